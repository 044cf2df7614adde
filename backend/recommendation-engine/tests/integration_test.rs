use async_trait::async_trait;
use recommendation_engine::repository::{
    validate_raw_events, EventRepository, StubEventRepository, StubUserRepository, UserRepository,
};
use recommendation_engine::services::embedder::TextEncoder;
use recommendation_engine::{
    CategoryScore, Cluster, Config, EventCandidate, RawEvent, Rating, RecommendationEngine,
    Result, UserProfile,
};
use std::sync::Arc;
use std::time::Duration;
use vector_cache::VectorCache;

const DIM: usize = 64;

/// Deterministic bag-of-words encoder standing in for the ONNX model.
struct StubEncoder;

fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % DIM as u64) as usize
}

#[async_trait]
impl TextEncoder for StubEncoder {
    async fn encode(&self, texts: &[String], _batch_size: Option<usize>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIM];
                for token in text.to_lowercase().split_whitespace() {
                    vector[bucket(token)] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

fn test_config() -> Config {
    use recommendation_engine::config::*;
    Config {
        redis: RedisConfig {
            url: "redis://127.0.0.1:6390".to_string(),
            cache_ttl_secs: 60,
        },
        embedding: EmbeddingConfig {
            model_path: "unused.onnx".to_string(),
            tokenizer_path: "unused.json".to_string(),
            batch_size: 16,
            encode_timeout_secs: 5,
        },
        matching: MatchingConfig {
            clusters_path: "unused.json".to_string(),
            similarity_threshold: 0.4,
            top_k: 10,
        },
        sequence: SequenceConfig {
            seq_len: 10,
            recommend_count: 5,
            hidden_size: 16,
            learning_rate: 0.001,
            fallback_affinity_weight: 0.3,
            training_queue_capacity: 8,
        },
        profile: ProfileConfig {
            max_history: 50,
            update_weight: 0.3,
        },
    }
}

fn dead_cache() -> Arc<VectorCache> {
    // Nothing listens here; the engine must keep working on cache misses.
    let client = redis::Client::open("redis://127.0.0.1:6390").expect("valid redis url");
    Arc::new(VectorCache::with_client(client, Duration::from_secs(60)))
}

fn catalog() -> Vec<Cluster> {
    vec![
        Cluster {
            name: "Jazz lovers".to_string(),
            age_range: "25–60 лет".to_string(),
            interests: vec!["jazz".to_string(), "blues".to_string()],
            preferences: vec!["concerts".to_string()],
            motivations: vec!["music".to_string()],
        },
        Cluster {
            name: "Extreme sports".to_string(),
            age_range: "18–35 лет".to_string(),
            interests: vec!["skydiving".to_string(), "climbing".to_string()],
            preferences: vec!["outdoors".to_string()],
            motivations: vec!["adrenaline".to_string()],
        },
    ]
}

fn jazz_event(id: i64) -> EventCandidate {
    EventCandidate {
        id,
        title: "Jazz night".to_string(),
        description: "live jazz".to_string(),
        tags: vec!["music".to_string()],
        category: None,
        age_restriction: None,
        cluster_scores: vec![],
    }
}

async fn engine() -> RecommendationEngine {
    RecommendationEngine::with_components(test_config(), Arc::new(StubEncoder), dead_cache(), catalog())
        .await
        .expect("engine construction")
}

#[tokio::test]
async fn test_classification_ranks_overlapping_cluster_first() {
    let engine = engine().await;

    let ranked = engine.classify_event(&jazz_event(1)).await;
    assert!(!ranked.is_empty());
    assert_eq!(ranked[0].0, "Jazz lovers");
}

#[tokio::test]
async fn test_cold_user_gets_leading_candidates_unchanged() {
    let engine = engine().await;
    let profile = UserProfile::default();
    let candidates: Vec<EventCandidate> = (1..=7).map(jazz_event).collect();

    let recommended = engine.recommend_for_user(&profile, &candidates).await;
    let ids: Vec<i64> = recommended.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_like_feedback_updates_profile_within_bounds() {
    let engine = engine().await;
    let mut profile = UserProfile::default();
    let mut event = jazz_event(1);
    event.cluster_scores = vec![CategoryScore::new("Jazz lovers", 0.9)];
    let candidates = vec![event.clone()];

    for _ in 0..10 {
        engine
            .apply_feedback(&mut profile, &event, Rating::Like, &candidates)
            .await;
    }

    assert_eq!(profile.event_history.len(), 1);
    assert_eq!(profile.status_ml.len(), 1);
    assert_eq!(profile.status_ml[0].category, "Jazz lovers");
    assert!((0.0..=1.0).contains(&profile.status_ml[0].score));
    // Ten likes at 0.9 × 0.3 each saturate the clamp.
    assert!((profile.status_ml[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_dislike_feedback_touches_history_only() {
    let engine = engine().await;
    let mut profile = UserProfile::default();
    let event = jazz_event(2);

    engine
        .apply_feedback(&mut profile, &event, Rating::Dislike, &[event.clone()])
        .await;

    assert_eq!(profile.event_history.len(), 1);
    assert_eq!(profile.event_history[0].rating, Rating::Dislike);
    assert!(profile.status_ml.is_empty());
}

#[tokio::test]
async fn test_repository_boundary_round_trip() {
    let raw = vec![
        RawEvent {
            id: Some(1),
            title: Some("Jazz night".to_string()),
            description: Some("live jazz".to_string()),
            tags: vec!["music".to_string()],
            ..Default::default()
        },
        // Rejected: no id to key the cache with.
        RawEvent {
            title: Some("mystery event".to_string()),
            ..Default::default()
        },
    ];
    let events = validate_raw_events(raw);
    assert_eq!(events.len(), 1);

    let event_repo = StubEventRepository::new(events);
    let user_repo = StubUserRepository::default();
    let engine = engine().await;

    let candidates = event_repo.fetch_candidates(50).await.unwrap();
    let mut profile = user_repo.fetch_profile(42).await.unwrap().unwrap_or_default();

    let recommended = engine.recommend_for_user(&profile, &candidates).await;
    assert_eq!(recommended.len(), 1);

    engine
        .apply_feedback(&mut profile, &recommended[0], Rating::Like, &candidates)
        .await;
    user_repo.save_scores(42, &profile.status_ml).await.unwrap();
    user_repo
        .save_history(42, &profile.event_history)
        .await
        .unwrap();

    let stored = user_repo.fetch_profile(42).await.unwrap().unwrap();
    assert_eq!(stored.event_history.len(), 1);
}
