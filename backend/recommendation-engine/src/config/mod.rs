use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub sequence: SequenceConfig,
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub model_path: String,
    pub tokenizer_path: String,
    pub batch_size: usize,
    /// Upper bound on any single encode call from a user-facing path.
    pub encode_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    pub clusters_path: String,
    pub similarity_threshold: f32,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    pub seq_len: usize,
    pub recommend_count: usize,
    pub hidden_size: usize,
    pub learning_rate: f32,
    /// Per-liked-event accumulation weight used by Fallback Mode scoring.
    /// Deliberately separate from `ProfileConfig::update_weight`: the two
    /// 0.3 factors in the scoring pipeline are independently tunable.
    pub fallback_affinity_weight: f32,
    pub training_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    pub max_history: usize,
    /// Blend weight applied when folding an event's cluster scores into a
    /// user's profile after a like.
    pub update_weight: f32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                cache_ttl_secs: env::var("CACHE_TTL")
                    .unwrap_or_else(|_| "604800".to_string())
                    .parse()
                    .expect("CACHE_TTL must be a valid u64"),
            },
            embedding: EmbeddingConfig {
                model_path: env::var("MODEL_PATH")
                    .unwrap_or_else(|_| "models/encoder.onnx".to_string()),
                tokenizer_path: env::var("TOKENIZER_PATH")
                    .unwrap_or_else(|_| "models/tokenizer.json".to_string()),
                batch_size: env::var("BATCH_SIZE")
                    .unwrap_or_else(|_| "16".to_string())
                    .parse()
                    .expect("BATCH_SIZE must be a valid usize"),
                encode_timeout_secs: env::var("EMBED_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("EMBED_TIMEOUT_SECS must be a valid u64"),
            },
            matching: MatchingConfig {
                clusters_path: env::var("CLUSTERS_PATH")
                    .unwrap_or_else(|_| "clusters.json".to_string()),
                similarity_threshold: env::var("SIMILARITY_THRESHOLD")
                    .unwrap_or_else(|_| "0.4".to_string())
                    .parse()
                    .expect("SIMILARITY_THRESHOLD must be a valid f32"),
                top_k: env::var("TOP_K")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("TOP_K must be a valid usize"),
            },
            sequence: SequenceConfig {
                seq_len: env::var("SEQ_LEN")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("SEQ_LEN must be a valid usize"),
                recommend_count: env::var("RECOMMEND_COUNT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("RECOMMEND_COUNT must be a valid usize"),
                hidden_size: env::var("HIDDEN_SIZE")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()
                    .expect("HIDDEN_SIZE must be a valid usize"),
                learning_rate: env::var("LEARNING_RATE")
                    .unwrap_or_else(|_| "0.001".to_string())
                    .parse()
                    .expect("LEARNING_RATE must be a valid f32"),
                fallback_affinity_weight: env::var("FALLBACK_AFFINITY_WEIGHT")
                    .unwrap_or_else(|_| "0.3".to_string())
                    .parse()
                    .expect("FALLBACK_AFFINITY_WEIGHT must be a valid f32"),
                training_queue_capacity: env::var("TRAINING_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()
                    .expect("TRAINING_QUEUE_CAPACITY must be a valid usize"),
            },
            profile: ProfileConfig {
                max_history: env::var("MAX_HISTORY")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .expect("MAX_HISTORY must be a valid usize"),
                update_weight: env::var("PROFILE_UPDATE_WEIGHT")
                    .unwrap_or_else(|_| "0.3".to_string())
                    .parse()
                    .expect("PROFILE_UPDATE_WEIGHT must be a valid f32"),
            },
        }
    }
}
