//! Shared test doubles for unit tests.

use crate::error::{EngineError, Result};
use crate::services::embedder::TextEncoder;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use vector_cache::VectorCache;

pub const DIM: usize = 64;

/// Deterministic bag-of-words encoder: texts sharing tokens get similar
/// vectors. Stands in for the ONNX embedder in unit tests.
#[derive(Default)]
pub struct HashEncoder;

fn token_bucket(token: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % DIM as u64) as usize
}

#[async_trait]
impl TextEncoder for HashEncoder {
    async fn encode(&self, texts: &[String], _batch_size: Option<usize>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIM];
                for token in text.to_lowercase().split_whitespace() {
                    vector[token_bucket(token)] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Encoder whose every call fails, for degraded-path tests.
pub struct FailingEncoder;

#[async_trait]
impl TextEncoder for FailingEncoder {
    async fn encode(&self, _texts: &[String], _batch_size: Option<usize>) -> Result<Vec<Vec<f32>>> {
        Err(EngineError::Embedding("encoder is down".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// A cache whose backend is unreachable; every operation degrades to a miss.
pub fn dead_cache() -> Arc<VectorCache> {
    let client = redis::Client::open("redis://127.0.0.1:6390").expect("valid redis url");
    Arc::new(VectorCache::with_client(client, Duration::from_secs(60)))
}
