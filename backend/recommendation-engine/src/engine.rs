//! Engine facade: one explicitly-constructed set of services with a defined
//! lifecycle. Built once at process start, shared by reference into the
//! request-handling code, dropped on shutdown (which also stops the
//! background trainer).

use crate::config::Config;
use crate::error::Result;
use crate::models::{
    CategoryScore, Cluster, EventCandidate, HistoryEntry, Rating, UserProfile,
};
use crate::services::clusters::{load_catalog, ClusterCatalog, ClusterMatcher};
use crate::services::embedder::{OnnxTextEmbedder, TextEncoder};
use crate::services::profile::update_profile;
use crate::services::resolve::VectorResolver;
use crate::services::sequence::{SequenceRecommender, TrainingJob, TrainingQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vector_cache::VectorCache;

pub struct RecommendationEngine {
    config: Config,
    resolver: Arc<VectorResolver>,
    catalog: Arc<ClusterCatalog>,
    matcher: ClusterMatcher,
    recommender: Arc<SequenceRecommender>,
    training: TrainingQueue,
}

impl RecommendationEngine {
    /// Builds the full production engine. Model load, cache connectivity
    /// and catalog parse failures abort here; there is no degraded startup.
    pub async fn new(config: Config) -> Result<Self> {
        let embedder = OnnxTextEmbedder::load(
            &config.embedding.model_path,
            &config.embedding.tokenizer_path,
            config.embedding.batch_size,
        )?;
        let cache = VectorCache::connect(
            &config.redis.url,
            Duration::from_secs(config.redis.cache_ttl_secs),
        )
        .await?;
        let clusters = load_catalog(&config.matching.clusters_path)?;

        Self::with_components(config, Arc::new(embedder), Arc::new(cache), clusters).await
    }

    /// Dependency-injection constructor: callers supply the encoder, cache
    /// and parsed catalog.
    pub async fn with_components(
        config: Config,
        encoder: Arc<dyn TextEncoder>,
        cache: Arc<VectorCache>,
        clusters: Vec<Cluster>,
    ) -> Result<Self> {
        let resolver = Arc::new(VectorResolver::new(
            encoder,
            cache,
            Duration::from_secs(config.embedding.encode_timeout_secs),
        ));

        let catalog = Arc::new(ClusterCatalog::load(clusters, &resolver).await?);
        info!(clusters = catalog.len(), "Cluster catalog loaded");

        let matcher = ClusterMatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&resolver),
            config.matching.similarity_threshold,
            config.matching.top_k,
        );

        let recommender = Arc::new(SequenceRecommender::new(
            Arc::clone(&resolver),
            config.sequence.seq_len,
            config.sequence.recommend_count,
            config.sequence.hidden_size,
            config.sequence.learning_rate,
            config.sequence.fallback_affinity_weight,
        ));

        let training = TrainingQueue::spawn(
            Arc::clone(&recommender),
            config.sequence.training_queue_capacity,
        );

        Ok(Self {
            config,
            resolver,
            catalog,
            matcher,
            recommender,
            training,
        })
    }

    /// Ranked event selection for a user.
    pub async fn recommend_for_user(
        &self,
        profile: &UserProfile,
        candidates: &[EventCandidate],
    ) -> Vec<EventCandidate> {
        self.recommender
            .recommend(&profile.event_history, candidates)
            .await
    }

    /// Audience classification of one event against the catalog.
    pub async fn classify_event(&self, event: &EventCandidate) -> Vec<(String, f32)> {
        self.matcher.relevant_clusters(event).await
    }

    /// Applies user feedback to the profile: history append (dedupe +
    /// bound), a profile blend on a like, and a background training job.
    /// The caller persists the mutated profile through its repository.
    pub async fn apply_feedback(
        &self,
        profile: &mut UserProfile,
        event: &EventCandidate,
        rating: Rating,
        candidates: &[EventCandidate],
    ) {
        profile.push_history(
            HistoryEntry {
                event_id: event.id,
                rating,
                timestamp: chrono::Utc::now().timestamp(),
            },
            self.config.profile.max_history,
        );

        if rating == Rating::Like {
            let event_scores: Vec<CategoryScore> = if event.cluster_scores.is_empty() {
                self.matcher
                    .relevant_clusters(event)
                    .await
                    .into_iter()
                    .map(|(category, score)| CategoryScore::new(category, score))
                    .collect()
            } else {
                event.cluster_scores.clone()
            };

            profile.status_ml = update_profile(
                &profile.status_ml,
                &event_scores,
                self.config.profile.update_weight,
            );
        }

        self.training.submit(TrainingJob {
            history: profile.event_history.clone(),
            events: candidates.to_vec(),
        });
    }

    /// Drops the cached vector of an event whose text changed.
    pub async fn invalidate_event(&self, event_id: i64) -> bool {
        self.resolver.invalidate_event(event_id).await
    }

    pub fn catalog(&self) -> &ClusterCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
