pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use engine::RecommendationEngine;
pub use error::{EngineError, Result};
pub use models::{
    CategoryScore, Cluster, EventCandidate, HistoryEntry, RawEvent, Rating, RecommendationResult,
    UserProfile,
};
pub use services::{ClusterCatalog, ClusterMatcher, SequenceRecommender, VectorResolver};
