//! Sequence-based recommendation.
//!
//! A small recurrent network over the embedding sequence of a user's
//! interactions predicts a "next interest" vector; candidates are ranked by
//! similarity to it. Users without enough history are scored from their
//! accumulated cluster-affinity profile instead (Fallback Mode). Training
//! runs on a background queue, decoupled from the request path.

use crate::error::{EngineError, Result};
use crate::models::{EventCandidate, HistoryEntry, Rating, RecommendationResult};
use crate::services::embedder::cosine_similarity;
use crate::services::resolve::VectorResolver;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const INIT_SCALE: f32 = 0.08;

/// Single-layer tanh recurrent network with a linear readout, predicting
/// the next embedding of a weighted interaction sequence.
pub struct RecurrentPredictor {
    input_size: usize,
    hidden_size: usize,
    learning_rate: f32,
    w_x: Array2<f32>,
    w_h: Array2<f32>,
    b_h: Array1<f32>,
    w_o: Array2<f32>,
    b_o: Array1<f32>,
}

fn init_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-INIT_SCALE..INIT_SCALE))
}

fn outer(a: &Array1<f32>, b: &Array1<f32>) -> Array2<f32> {
    let a = a.view().insert_axis(Axis(1));
    let b = b.view().insert_axis(Axis(0));
    a.dot(&b)
}

impl RecurrentPredictor {
    pub fn new(input_size: usize, hidden_size: usize, learning_rate: f32) -> Self {
        Self::with_rng(
            input_size,
            hidden_size,
            learning_rate,
            &mut StdRng::from_entropy(),
        )
    }

    /// Deterministic construction for tests.
    pub fn with_seed(input_size: usize, hidden_size: usize, learning_rate: f32, seed: u64) -> Self {
        Self::with_rng(
            input_size,
            hidden_size,
            learning_rate,
            &mut StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(input_size: usize, hidden_size: usize, learning_rate: f32, rng: &mut StdRng) -> Self {
        Self {
            input_size,
            hidden_size,
            learning_rate,
            w_x: init_matrix(rng, hidden_size, input_size),
            w_h: init_matrix(rng, hidden_size, hidden_size),
            b_h: Array1::zeros(hidden_size),
            w_o: init_matrix(rng, input_size, hidden_size),
            b_o: Array1::zeros(input_size),
        }
    }

    fn check_sequence(&self, sequence: &[Array1<f32>]) -> Result<()> {
        if sequence.is_empty() {
            return Err(EngineError::InvalidData(
                "empty input sequence".to_string(),
            ));
        }
        for vector in sequence {
            if vector.len() != self.input_size {
                return Err(EngineError::DimensionMismatch {
                    expected: self.input_size,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }

    /// Runs the recurrence, returning the final hidden state and the one
    /// before it (needed for the truncated backward pass).
    fn run(&self, sequence: &[Array1<f32>]) -> (Array1<f32>, Array1<f32>) {
        let mut hidden = Array1::zeros(self.hidden_size);
        let mut previous = Array1::zeros(self.hidden_size);
        for input in sequence {
            previous = hidden.clone();
            let z = self.w_x.dot(input) + self.w_h.dot(&previous) + &self.b_h;
            hidden = z.mapv(f32::tanh);
        }
        (hidden, previous)
    }

    /// Predicted next-interest vector for the sequence.
    pub fn predict(&self, sequence: &[Array1<f32>]) -> Result<Array1<f32>> {
        self.check_sequence(sequence)?;
        let (hidden, _) = self.run(sequence);
        Ok(self.w_o.dot(&hidden) + &self.b_o)
    }

    /// One SGD step on the MSE between the prediction and `target`.
    /// Backpropagation is truncated to the readout and the final recurrent
    /// step. Returns the pre-step loss.
    pub fn train_step(&mut self, sequence: &[Array1<f32>], target: &Array1<f32>) -> Result<f32> {
        self.check_sequence(sequence)?;
        if target.len() != self.input_size {
            return Err(EngineError::DimensionMismatch {
                expected: self.input_size,
                actual: target.len(),
            });
        }

        let (hidden, previous) = self.run(sequence);
        let prediction = self.w_o.dot(&hidden) + &self.b_o;
        let diff = &prediction - target;
        let loss = diff.mapv(|v| v * v).mean().unwrap_or(0.0);

        let d_prediction = diff.mapv(|v| 2.0 * v / self.input_size as f32);
        let d_w_o = outer(&d_prediction, &hidden);
        let d_b_o = d_prediction.clone();

        let d_hidden = self.w_o.t().dot(&d_prediction);
        let d_z = &d_hidden * &hidden.mapv(|v| 1.0 - v * v);
        let last_input = &sequence[sequence.len() - 1];
        let d_w_x = outer(&d_z, last_input);
        let d_w_h = outer(&d_z, &previous);

        self.w_o.scaled_add(-self.learning_rate, &d_w_o);
        self.b_o.scaled_add(-self.learning_rate, &d_b_o);
        self.w_x.scaled_add(-self.learning_rate, &d_w_x);
        self.w_h.scaled_add(-self.learning_rate, &d_w_h);
        self.b_h.scaled_add(-self.learning_rate, &d_z);

        Ok(loss)
    }
}

/// Ranks candidate events from a user's interaction history.
pub struct SequenceRecommender {
    resolver: Arc<VectorResolver>,
    model: RwLock<RecurrentPredictor>,
    seq_len: usize,
    recommend_count: usize,
    fallback_affinity_weight: f32,
}

impl SequenceRecommender {
    pub fn new(
        resolver: Arc<VectorResolver>,
        seq_len: usize,
        recommend_count: usize,
        hidden_size: usize,
        learning_rate: f32,
        fallback_affinity_weight: f32,
    ) -> Self {
        let model = RecurrentPredictor::new(resolver.dimension(), hidden_size, learning_rate);
        Self {
            resolver,
            model: RwLock::new(model),
            seq_len,
            recommend_count,
            fallback_affinity_weight,
        }
    }

    #[cfg(test)]
    fn with_model(
        resolver: Arc<VectorResolver>,
        model: RecurrentPredictor,
        seq_len: usize,
        recommend_count: usize,
        fallback_affinity_weight: f32,
    ) -> Self {
        Self {
            resolver,
            model: RwLock::new(model),
            seq_len,
            recommend_count,
            fallback_affinity_weight,
        }
    }

    /// Returns up to `recommend_count` candidates, best first.
    ///
    /// Sequence mode needs at least `seq_len / 2` history entries and two
    /// resolvable vectors; anything less degrades to Fallback Mode. Errors
    /// never propagate out of a recommendation request.
    pub async fn recommend(
        &self,
        history: &[HistoryEntry],
        candidates: &[EventCandidate],
    ) -> Vec<EventCandidate> {
        if history.len() < self.seq_len / 2 {
            return self.fallback_recommend(history, candidates);
        }

        let sequence = self.weighted_history_vectors(history, candidates).await;
        if sequence.len() < 2 {
            debug!(
                resolved = sequence.len(),
                "Too few history vectors, using fallback scoring"
            );
            return self.fallback_recommend(history, candidates);
        }

        let predicted = {
            let model = self.model.read().await;
            match model.predict(&sequence[..sequence.len() - 1]) {
                Ok(vector) => vector.to_vec(),
                Err(e) => {
                    warn!(error = %e, "Sequence prediction failed, using fallback scoring");
                    return self.fallback_recommend(history, candidates);
                }
            }
        };

        let mut scored: RecommendationResult = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let vector = match self.resolver.event_vector(candidate).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(event_id = candidate.id, error = %e, "Skipping unresolvable candidate");
                    continue;
                }
            };
            match cosine_similarity(&predicted, &vector) {
                Ok(similarity) => scored.push((candidate.clone(), similarity)),
                Err(e) => {
                    warn!(event_id = candidate.id, error = %e, "Skipping candidate");
                }
            }
        }

        sort_scored_descending(&mut scored);
        scored
            .into_iter()
            .take(self.recommend_count)
            .map(|(candidate, _)| candidate)
            .collect()
    }

    /// Affinity-sum scoring for users with short history.
    ///
    /// Only likes contribute: each liked event's cluster scores accumulate
    /// into a per-category affinity (scaled by the fallback weight), and a
    /// candidate scores the dot product of its own cluster scores against
    /// that affinity map.
    fn fallback_recommend(
        &self,
        history: &[HistoryEntry],
        candidates: &[EventCandidate],
    ) -> Vec<EventCandidate> {
        if history.is_empty() {
            return candidates
                .iter()
                .take(self.recommend_count)
                .cloned()
                .collect();
        }

        let mut affinity: HashMap<String, f32> = HashMap::new();
        for entry in history {
            if entry.rating != Rating::Like {
                continue;
            }
            let Some(event) = candidates.iter().find(|e| e.id == entry.event_id) else {
                continue;
            };
            for cluster_score in &event.cluster_scores {
                *affinity.entry(cluster_score.category.clone()).or_insert(0.0) +=
                    cluster_score.score * self.fallback_affinity_weight;
            }
        }

        let mut scored: RecommendationResult = candidates
            .iter()
            .map(|candidate| {
                let total: f32 = candidate
                    .cluster_scores
                    .iter()
                    .filter_map(|cs| affinity.get(&cs.category).map(|a| cs.score * a))
                    .sum();
                (candidate.clone(), total)
            })
            .collect();

        sort_scored_descending(&mut scored);
        scored
            .into_iter()
            .take(self.recommend_count)
            .map(|(candidate, _)| candidate)
            .collect()
    }

    /// One optimizer step over the user's recent interaction window.
    /// Failures are logged and skipped; training never affects
    /// recommendation availability.
    pub async fn train(&self, history: &[HistoryEntry], events: &[EventCandidate]) {
        let sequence = self.weighted_history_vectors(history, events).await;
        if sequence.len() < 2 {
            debug!(
                resolved = sequence.len(),
                "Too few history vectors for a training step"
            );
            return;
        }

        let (inputs, target) = sequence.split_at(sequence.len() - 1);
        let mut model = self.model.write().await;
        match model.train_step(inputs, &target[0]) {
            Ok(loss) => debug!(loss, "Training step complete"),
            Err(e) => warn!(error = %e, "Training step failed, skipping"),
        }
    }

    /// Vectors of the up-to-`seq_len` most recent history events found in
    /// `events`, each scaled by its rating weight. Unresolvable entries are
    /// skipped.
    async fn weighted_history_vectors(
        &self,
        history: &[HistoryEntry],
        events: &[EventCandidate],
    ) -> Vec<Array1<f32>> {
        let window_start = history.len().saturating_sub(self.seq_len);
        let mut vectors = Vec::new();

        for entry in &history[window_start..] {
            let Some(event) = events.iter().find(|e| e.id == entry.event_id) else {
                continue;
            };
            match self.resolver.event_vector(event).await {
                Ok(vector) => {
                    let weight = entry.rating.sequence_weight();
                    vectors.push(Array1::from_iter(vector.into_iter().map(|v| v * weight)));
                }
                Err(e) => {
                    warn!(event_id = entry.event_id, error = %e, "Skipping history entry");
                }
            }
        }
        vectors
    }
}

fn sort_scored_descending(scored: &mut [(EventCandidate, f32)]) {
    // Stable: ties retain candidate input order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// A window of user history handed to the background trainer.
#[derive(Debug)]
pub struct TrainingJob {
    pub history: Vec<HistoryEntry>,
    pub events: Vec<EventCandidate>,
}

/// Background training worker fed through a bounded channel, so feedback
/// handling never blocks on an optimizer step.
pub struct TrainingQueue {
    tx: mpsc::Sender<TrainingJob>,
    handle: JoinHandle<()>,
}

impl TrainingQueue {
    pub fn spawn(recommender: Arc<SequenceRecommender>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TrainingJob>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                recommender.train(&job.history, &job.events).await;
            }
        });
        Self { tx, handle }
    }

    /// Non-blocking submit. A full or closed queue drops the job with a
    /// warning; training is best-effort by contract.
    pub fn submit(&self, job: TrainingJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Training queue unavailable, dropping job");
                false
            }
        }
    }
}

impl Drop for TrainingQueue {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
