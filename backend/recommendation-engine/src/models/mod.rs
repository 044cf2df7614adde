//! Core value types shared across the engine services.
//!
//! Event payloads arrive as loosely-shaped JSON from the event repository;
//! they are validated into [`EventCandidate`] at that boundary so the
//! matcher and recommender only ever see well-formed records.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// One (category, score) pair of a cluster-affinity vector.
///
/// Used both for an event's audience classification and for a user's
/// accumulated interest profile (`status_ml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f32,
}

impl CategoryScore {
    pub fn new(category: impl Into<String>, score: f32) -> Self {
        Self {
            category: category.into(),
            score,
        }
    }
}

/// User feedback on a recommended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Like,
    Dislike,
    Confirmed,
}

impl Rating {
    /// Weight applied to an event vector in the interaction sequence.
    /// Likes pull the predicted next-interest vector toward the event,
    /// everything else pushes mildly away.
    pub fn sequence_weight(self) -> f32 {
        match self {
            Rating::Like => 1.0,
            _ => -0.3,
        }
    }
}

/// One entry of a user's interaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: i64,
    pub rating: Rating,
    pub timestamp: i64,
}

/// Raw event record as received from the event repository. All fields are
/// optional here; validation happens in [`EventCandidate::try_from`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub age_restriction: Option<String>,
    #[serde(default, alias = "status_ml")]
    pub cluster_scores: Vec<CategoryScore>,
}

/// Validated event candidate supplied per recommendation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Free-form restriction like `"18+"`.
    pub age_restriction: Option<String>,
    /// Audience classification produced by the cluster matcher.
    #[serde(default, alias = "status_ml")]
    pub cluster_scores: Vec<CategoryScore>,
}

impl EventCandidate {
    /// The text blob that gets embedded for this event.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title,
            self.description,
            self.tags.join(" ")
        )
    }
}

impl TryFrom<RawEvent> for EventCandidate {
    type Error = EngineError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        let id = raw.id.ok_or(EngineError::MissingEventId)?;
        Ok(EventCandidate {
            id,
            title: raw.title.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            tags: raw.tags,
            category: raw.category,
            age_restriction: raw.age_restriction,
            cluster_scores: raw.cluster_scores,
        })
    }
}

/// A named audience segment from the fixed classification taxonomy.
///
/// The serde aliases accept the production catalog file, whose keys are
/// Russian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(alias = "название")]
    pub name: String,
    /// Free-text age range, e.g. `"30–50 лет (с детьми)"`.
    #[serde(alias = "возраст")]
    pub age_range: String,
    #[serde(alias = "интересы")]
    pub interests: Vec<String>,
    #[serde(alias = "предпочтения")]
    pub preferences: Vec<String>,
    #[serde(alias = "мотивация")]
    pub motivations: Vec<String>,
}

impl Cluster {
    /// The text blob that gets embedded for this cluster: all tag lists
    /// concatenated in declaration order.
    pub fn embedding_text(&self) -> String {
        self.interests
            .iter()
            .chain(self.preferences.iter())
            .chain(self.motivations.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Transient ranking produced by the recommender or matcher scoring
/// pipeline, best first. Never persisted.
pub type RecommendationResult = Vec<(EventCandidate, f32)>;

/// The subset of a user record owned by this engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Per-category affinity scores, each in [0, 1].
    #[serde(default)]
    pub status_ml: Vec<CategoryScore>,
    /// Most recent interactions, newest last, bounded length.
    #[serde(default)]
    pub event_history: Vec<HistoryEntry>,
}

impl UserProfile {
    /// Appends an interaction, deduplicating by event id (the newest entry
    /// wins) and trimming the oldest entries beyond `max_len`.
    pub fn push_history(&mut self, entry: HistoryEntry, max_len: usize) {
        self.event_history
            .retain(|item| item.event_id != entry.event_id);
        self.event_history.push(entry);

        if self.event_history.len() > max_len {
            let excess = self.event_history.len() - max_len;
            self.event_history.drain(..excess);
        }
    }
}
