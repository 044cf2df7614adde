//! Resolve-or-compute-and-cache helper.
//!
//! Every caller that needs an event or cluster vector goes through this one
//! place, so the cache-consistency rule (a cached vector always matches the
//! text that produced it at write time) is enforced once instead of at each
//! call site.

use crate::error::{EngineError, Result};
use crate::models::EventCandidate;
use crate::services::embedder::TextEncoder;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use vector_cache::VectorCache;

pub struct VectorResolver {
    encoder: Arc<dyn TextEncoder>,
    cache: Arc<VectorCache>,
    encode_timeout: Duration,
}

impl VectorResolver {
    pub fn new(
        encoder: Arc<dyn TextEncoder>,
        cache: Arc<VectorCache>,
        encode_timeout: Duration,
    ) -> Self {
        Self {
            encoder,
            cache,
            encode_timeout,
        }
    }

    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    /// Resolves the vector for `key`: cache lookup first, then encode the
    /// text and write the fresh value through.
    pub async fn text_vector(&self, key: &str, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(key).await {
            return Ok(cached);
        }

        let vector = self.encode_bounded(text).await?;
        self.cache.set(key, &vector, None).await;
        debug!(key, "Computed and cached vector");
        Ok(vector)
    }

    /// Resolves an event's vector, keyed by `event_vector:<id>`.
    pub async fn event_vector(&self, event: &EventCandidate) -> Result<Vec<f32>> {
        let key = VectorCache::event_vector_key(event.id);
        self.text_vector(&key, &event.embedding_text()).await
    }

    /// Resolves a cluster's vector: cache first, then the in-process map
    /// built at catalog load time.
    pub async fn cluster_vector(
        &self,
        name: &str,
        loaded: &HashMap<String, Vec<f32>>,
    ) -> Result<Vec<f32>> {
        let key = VectorCache::cluster_vector_key(name);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        loaded.get(name).cloned().ok_or_else(|| {
            EngineError::InvalidData(format!("cluster '{name}' was never vectorized"))
        })
    }

    /// Drops the cached vector for an event whose text has changed.
    pub async fn invalidate_event(&self, event_id: i64) -> bool {
        self.cache
            .delete(&VectorCache::event_vector_key(event_id))
            .await
    }

    async fn encode_bounded(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = timeout(self.encode_timeout, self.encoder.encode(&texts, None))
            .await
            .map_err(|_| {
                EngineError::Timeout(format!(
                    "encoding did not finish within {}s",
                    self.encode_timeout.as_secs()
                ))
            })??;

        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("encoder returned no vector".to_string()))
    }
}
