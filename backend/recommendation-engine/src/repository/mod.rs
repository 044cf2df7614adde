//! Repository seams for the surrounding bot runtime.
//!
//! The engine consumes events and user profiles through these traits;
//! the relational persistence behind them is not this crate's concern.
//! Raw event records are validated here, at the boundary, so the matcher
//! and recommender only see well-formed candidates.

use crate::error::Result;
use crate::models::{CategoryScore, EventCandidate, HistoryEntry, RawEvent, UserProfile};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

/// Event lookup as exposed by the event store.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Candidate events for a recommendation request.
    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<EventCandidate>>;

    /// Specific events by id (history hydration).
    async fn fetch_events(&self, ids: &[i64]) -> Result<Vec<EventCandidate>>;
}

/// User profile persistence. Writes must tolerate retries; the profile
/// updater is pure, so re-applying a save is safe.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn fetch_profile(&self, user_id: i64) -> Result<Option<UserProfile>>;

    async fn save_scores(&self, user_id: i64, scores: &[CategoryScore]) -> Result<()>;

    async fn save_history(&self, user_id: i64, history: &[HistoryEntry]) -> Result<()>;
}

/// Validates raw records into candidates, rejecting (and logging) records
/// without an `id`.
pub fn validate_raw_events(raw: Vec<RawEvent>) -> Vec<EventCandidate> {
    raw.into_iter()
        .filter_map(|record| match EventCandidate::try_from(record) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "Rejecting malformed event record");
                None
            }
        })
        .collect()
}

/// In-memory event repository for tests and for embedding the engine
/// before real storage is wired up.
#[derive(Default)]
pub struct StubEventRepository {
    events: Vec<EventCandidate>,
}

impl StubEventRepository {
    pub fn new(events: Vec<EventCandidate>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl EventRepository for StubEventRepository {
    async fn fetch_candidates(&self, limit: usize) -> Result<Vec<EventCandidate>> {
        Ok(self.events.iter().take(limit).cloned().collect())
    }

    async fn fetch_events(&self, ids: &[i64]) -> Result<Vec<EventCandidate>> {
        Ok(self
            .events
            .iter()
            .filter(|event| ids.contains(&event.id))
            .cloned()
            .collect())
    }
}

/// In-memory user repository.
#[derive(Default)]
pub struct StubUserRepository {
    profiles: RwLock<HashMap<i64, UserProfile>>,
}

#[async_trait]
impl UserRepository for StubUserRepository {
    async fn fetch_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }

    async fn save_scores(&self, user_id: i64, scores: &[CategoryScore]) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.entry(user_id).or_default().status_ml = scores.to_vec();
        Ok(())
    }

    async fn save_history(&self, user_id: i64, history: &[HistoryEntry]) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.entry(user_id).or_default().event_history = history.to_vec();
        Ok(())
    }
}
