//! Cluster catalog loading and event-to-cluster matching.
//!
//! The taxonomy is loaded once per process, vectorized once, and then
//! shared read-only across all concurrent requests.

use crate::error::{EngineError, Result};
use crate::models::{Cluster, EventCandidate};
use crate::services::resolve::VectorResolver;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use vector_cache::VectorCache;

/// Matches restrictions of the form `<N>+`, e.g. `"18+"`.
static AGE_RESTRICTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*\+\s*$").expect("invalid age restriction regex"));

/// Extracts the integers of a free-form age range like `"30–50 лет"`.
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("invalid number regex"));

/// Parses the catalog. The load is all-or-nothing: one malformed entry
/// fails the whole call.
pub fn parse_catalog(raw: &str) -> Result<Vec<Cluster>> {
    let clusters: Vec<Cluster> = serde_json::from_str(raw)
        .map_err(|e| EngineError::Catalog(format!("malformed cluster catalog: {e}")))?;
    if clusters.is_empty() {
        warn!("Cluster catalog is empty");
    }
    Ok(clusters)
}

pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<Cluster>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Catalog(format!("cannot read catalog {}: {e}", path.display()))
    })?;
    parse_catalog(&raw)
}

/// The loaded taxonomy plus its per-cluster vectors.
pub struct ClusterCatalog {
    clusters: Vec<Cluster>,
    vectors: HashMap<String, Vec<f32>>,
}

impl ClusterCatalog {
    /// Vectorizes every cluster once from its concatenated tag text and
    /// writes each vector through to the cache (`cluster_vector:<name>`)
    /// for cross-process reuse. A single cluster's failure is logged and
    /// skipped; the catalog stays usable.
    pub async fn load(clusters: Vec<Cluster>, resolver: &VectorResolver) -> Result<Self> {
        let mut vectors = HashMap::new();
        for cluster in &clusters {
            let key = VectorCache::cluster_vector_key(&cluster.name);
            match resolver.text_vector(&key, &cluster.embedding_text()).await {
                Ok(vector) => {
                    vectors.insert(cluster.name.clone(), vector);
                }
                Err(e) => {
                    error!(cluster = %cluster.name, error = %e, "Failed to vectorize cluster");
                }
            }
        }
        Ok(Self { clusters, vectors })
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn vectors(&self) -> &HashMap<String, Vec<f32>> {
        &self.vectors
    }

    pub fn get(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Ranks catalog clusters by semantic similarity to an event.
pub struct ClusterMatcher {
    catalog: Arc<ClusterCatalog>,
    resolver: Arc<VectorResolver>,
    similarity_threshold: f32,
    top_k: usize,
}

impl ClusterMatcher {
    pub fn new(
        catalog: Arc<ClusterCatalog>,
        resolver: Arc<VectorResolver>,
        similarity_threshold: f32,
        top_k: usize,
    ) -> Self {
        Self {
            catalog,
            resolver,
            similarity_threshold,
            top_k,
        }
    }

    /// Returns `(cluster_name, similarity)` pairs, descending by similarity.
    ///
    /// Never fails the caller: any unexpected error in the pipeline yields
    /// an empty list for this one event, logged with its id.
    pub async fn relevant_clusters(&self, event: &EventCandidate) -> Vec<(String, f32)> {
        match self.score_event(event).await {
            Ok(ranked) => ranked,
            Err(e) => {
                error!(event_id = event.id, error = %e, "Cluster matching failed");
                Vec::new()
            }
        }
    }

    async fn score_event(&self, event: &EventCandidate) -> Result<Vec<(String, f32)>> {
        let event_vector = self.resolver.event_vector(event).await?;

        let mut scores: Vec<(String, f32)> = Vec::with_capacity(self.catalog.len());
        for cluster in self.catalog.clusters() {
            match self.score_cluster(&event_vector, &cluster.name).await {
                Ok(similarity) => scores.push((cluster.name.clone(), similarity)),
                Err(e) => {
                    warn!(cluster = %cluster.name, error = %e, "Skipping cluster");
                }
            }
        }

        let mut filtered: Vec<(String, f32)> = match event.age_restriction.as_deref() {
            Some(restriction) => scores
                .iter()
                .filter(|(name, _)| !self.age_conflict(name, restriction))
                .cloned()
                .collect(),
            None => scores.clone(),
        };
        sort_descending(&mut filtered);

        if !filtered.is_empty() {
            let above_threshold: Vec<(String, f32)> = filtered
                .iter()
                .filter(|(_, similarity)| *similarity > self.similarity_threshold)
                .cloned()
                .collect();
            if !above_threshold.is_empty() {
                return Ok(above_threshold.into_iter().take(self.top_k).collect());
            }
            // Everything scored below the threshold: still return the single
            // best guess rather than nothing.
            return Ok(vec![filtered[0].clone()]);
        }

        // Age filtering removed every candidate: ignore the age rule and
        // return the best unfiltered match.
        sort_descending(&mut scores);
        Ok(scores.into_iter().take(1).collect())
    }

    async fn score_cluster(&self, event_vector: &[f32], cluster_name: &str) -> Result<f32> {
        let cluster_vector = self
            .resolver
            .cluster_vector(cluster_name, self.catalog.vectors())
            .await?;
        crate::services::embedder::cosine_similarity(event_vector, &cluster_vector)
    }

    fn age_conflict(&self, cluster_name: &str, restriction: &str) -> bool {
        match self.catalog.get(cluster_name) {
            Some(cluster) => age_conflict(cluster, restriction),
            None => false,
        }
    }
}

fn sort_descending(scores: &mut [(String, f32)]) {
    // Stable: equal similarities retain catalog order.
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Minimum age from a `<N>+` restriction, if the format matches.
fn parse_min_age(restriction: &str) -> Option<u32> {
    AGE_RESTRICTION_RE
        .captures(restriction)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether the event restriction excludes the cluster's audience.
///
/// Ambiguous data never removes a real match: an unparseable restriction
/// or an age range with fewer than two integers means "no conflict".
pub(crate) fn age_conflict(cluster: &Cluster, restriction: &str) -> bool {
    let Some(event_min_age) = parse_min_age(restriction) else {
        warn!(restriction, "Unparseable age restriction, keeping cluster");
        return false;
    };

    let numbers: Vec<u32> = NUMBER_RE
        .find_iter(&cluster.age_range)
        .filter_map(|m| m.as_str().parse().ok())
        .take(2)
        .collect();
    if numbers.len() < 2 {
        warn!(
            cluster = %cluster.name,
            age_range = %cluster.age_range,
            "Not enough numbers in cluster age range, keeping cluster"
        );
        return false;
    }

    let cluster_max_age = numbers[1];
    event_min_age > cluster_max_age
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_cache, HashEncoder};
    use std::time::Duration;

    fn cluster(name: &str, age_range: &str, tags: &[&str]) -> Cluster {
        Cluster {
            name: name.to_string(),
            age_range: age_range.to_string(),
            interests: tags.iter().map(|t| t.to_string()).collect(),
            preferences: vec![],
            motivations: vec![],
        }
    }

    fn event(id: i64, title: &str, description: &str, tags: &[&str]) -> EventCandidate {
        EventCandidate {
            id,
            title: title.to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            category: None,
            age_restriction: None,
            cluster_scores: vec![],
        }
    }

    async fn matcher_for(clusters: Vec<Cluster>, threshold: f32, top_k: usize) -> ClusterMatcher {
        let resolver = Arc::new(VectorResolver::new(
            Arc::new(HashEncoder::default()),
            dead_cache(),
            Duration::from_secs(5),
        ));
        let catalog = Arc::new(ClusterCatalog::load(clusters, &resolver).await.unwrap());
        ClusterMatcher::new(catalog, resolver, threshold, top_k)
    }

    #[test]
    fn test_parse_catalog_is_all_or_nothing() {
        let raw = r#"[
            {"name": "A", "age_range": "18–30", "interests": [], "preferences": [], "motivations": []},
            {"age_range": "oops, no name"}
        ]"#;
        assert!(matches!(parse_catalog(raw), Err(EngineError::Catalog(_))));
    }

    #[test]
    fn test_parse_catalog_accepts_well_formed_entries() {
        let raw = r#"[
            {"name": "A", "age_range": "18–30 лет", "interests": ["jazz"], "preferences": [], "motivations": []}
        ]"#;
        let clusters = parse_catalog(raw).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "A");
    }

    #[test]
    fn test_age_conflict_parsing() {
        let kids = cluster("Kids", "5–12 лет", &[]);
        assert!(age_conflict(&kids, "18+"));
        assert!(!age_conflict(&kids, "3+"));

        let vague = cluster("Everyone", "все возрасты", &[]);
        assert!(!age_conflict(&vague, "18+"));

        let adults = cluster("Adults", "30–50 лет (с детьми)", &[]);
        assert!(!age_conflict(&adults, "18+"));
        assert!(!age_conflict(&adults, "not-an-age"));
    }

    #[tokio::test]
    async fn test_textual_overlap_ranks_first() {
        let matcher = matcher_for(
            vec![
                cluster("Extreme sports", "18–35 лет", &["skydiving", "climbing", "adrenaline"]),
                cluster("Jazz lovers", "25–60 лет", &["jazz", "blues", "music"]),
            ],
            0.4,
            10,
        )
        .await;

        let ranked = matcher
            .relevant_clusters(&event(1, "Jazz night", "live jazz", &["music"]))
            .await;

        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].0, "Jazz lovers");
        if let Some(extreme) = ranked.iter().find(|(name, _)| name == "Extreme sports") {
            assert!(ranked[0].1 > extreme.1);
        }
    }

    #[tokio::test]
    async fn test_below_threshold_returns_single_best_guess() {
        let matcher = matcher_for(
            vec![
                cluster("Jazz lovers", "25–60 лет", &["jazz"]),
                cluster("Extreme sports", "18–35 лет", &["skydiving"]),
            ],
            0.99,
            10,
        )
        .await;

        let ranked = matcher
            .relevant_clusters(&event(2, "Opera evening", "classical opera", &[]))
            .await;
        assert_eq!(ranked.len(), 1);
    }

    #[tokio::test]
    async fn test_age_restriction_excludes_conflicting_cluster() {
        let matcher = matcher_for(
            vec![
                cluster("Kids", "5–12 лет", &["jazz", "music"]),
                cluster("Adults", "18–60 лет", &["jazz", "music"]),
            ],
            0.0,
            10,
        )
        .await;

        let mut restricted = event(3, "Jazz night", "live jazz", &["music"]);
        restricted.age_restriction = Some("18+".to_string());

        let ranked = matcher.relevant_clusters(&restricted).await;
        assert!(!ranked.is_empty());
        assert!(ranked.iter().all(|(name, _)| name != "Kids"));
    }

    #[tokio::test]
    async fn test_age_filter_emptying_results_falls_back_to_best_unfiltered() {
        let matcher = matcher_for(vec![cluster("Kids", "5–12 лет", &["jazz"])], 0.0, 10).await;

        let mut restricted = event(4, "Jazz night", "live jazz", &[]);
        restricted.age_restriction = Some("18+".to_string());

        let ranked = matcher.relevant_clusters(&restricted).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "Kids");
    }

    #[tokio::test]
    async fn test_empty_catalog_yields_empty_result() {
        let matcher = matcher_for(vec![], 0.4, 10).await;
        let ranked = matcher
            .relevant_clusters(&event(5, "Jazz night", "live jazz", &[]))
            .await;
        assert!(ranked.is_empty());
    }
}
