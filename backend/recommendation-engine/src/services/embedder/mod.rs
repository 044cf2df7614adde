//! Sentence-embedding model wrapper.
//!
//! Loads a pre-trained sentence-transformer exported to ONNX (tract) with
//! its HuggingFace tokenizer file, and turns batches of texts into
//! fixed-dimension vectors. Inference is CPU-bound and runs inside
//! `spawn_blocking` so a request-handling loop is never stalled by it.

pub mod similarity;

pub use similarity::{cosine_similarity, euclidean_distance, manhattan_distance, normalize};

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tract_onnx::prelude::*;
use tracing::debug;

/// Sequence length every input is padded/truncated to. The plan is compiled
/// for this exact shape, so batching never changes numerical output.
pub const MAX_SEQ_LEN: usize = 128;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Text-to-vector seam used by the resolver and the services built on it.
/// The production implementation is [`OnnxTextEmbedder`]; tests substitute
/// deterministic encoders.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Encodes `texts`, preserving order and length. `batch_size` is a
    /// performance knob only.
    async fn encode(&self, texts: &[String], batch_size: Option<usize>) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension, fixed per loaded model instance.
    fn dimension(&self) -> usize;
}

struct EncoderInner {
    plan: OnnxPlan,
    tokenizer: Tokenizer,
    input_count: usize,
    dimension: usize,
}

/// ONNX-backed sentence embedder.
pub struct OnnxTextEmbedder {
    inner: Arc<EncoderInner>,
    default_batch_size: usize,
}

impl OnnxTextEmbedder {
    /// Loads the tokenizer and model and compiles the inference plan.
    ///
    /// Any failure here is [`EngineError::ModelLoad`]: the engine cannot
    /// run without an embedder, so initialization aborts.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        tokenizer_path: P,
        default_batch_size: usize,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| EngineError::ModelLoad(format!("failed to load tokenizer: {e}")))?;

        let mut model = tract_onnx::onnx()
            .model_for_path(model_path.as_ref())
            .map_err(|e| EngineError::ModelLoad(format!("failed to load ONNX model: {e}")))?;

        // Transformer exports take input_ids + attention_mask, and some also
        // token_type_ids. Pin every input to i64 [1, MAX_SEQ_LEN].
        let input_count = model
            .input_outlets()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .len();
        for ix in 0..input_count {
            model = model
                .with_input_fact(
                    ix,
                    InferenceFact::dt_shape(i64::datum_type(), tvec!(1, MAX_SEQ_LEN)),
                )
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        }

        let plan = model
            .into_optimized()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .into_runnable()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let mut inner = EncoderInner {
            plan,
            tokenizer,
            input_count,
            dimension: 0,
        };

        // Probe the output dimension once; it is fixed for the model's life.
        let probe = Self::encode_one(&inner, "dimension probe")
            .map_err(|e| EngineError::ModelLoad(format!("model probe failed: {e}")))?;
        inner.dimension = probe.len();
        debug!(dimension = inner.dimension, "Loaded sentence embedding model");

        Ok(Self {
            inner: Arc::new(inner),
            default_batch_size: default_batch_size.max(1),
        })
    }

    fn encode_one(inner: &EncoderInner, text: &str) -> Result<Vec<f32>> {
        let encoding = inner
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::Embedding(format!("tokenization failed: {e}")))?;

        let ids = encoding.get_ids();
        let len = ids.len().min(MAX_SEQ_LEN);
        let mut input_ids = vec![0i64; MAX_SEQ_LEN];
        let mut attention_mask = vec![0i64; MAX_SEQ_LEN];
        for i in 0..len {
            input_ids[i] = i64::from(ids[i]);
            attention_mask[i] = 1;
        }

        let ids_tensor =
            tract_ndarray::Array2::from_shape_vec((1, MAX_SEQ_LEN), input_ids)
                .map_err(|e| EngineError::Embedding(e.to_string()))?;
        let mask_tensor =
            tract_ndarray::Array2::from_shape_vec((1, MAX_SEQ_LEN), attention_mask.clone())
                .map_err(|e| EngineError::Embedding(e.to_string()))?;

        let mut inputs: TVec<TValue> =
            tvec!(ids_tensor.into_dyn().into(), mask_tensor.into_dyn().into());
        // token_type_ids (and any further inputs) get all-zeros.
        for _ in 2..inner.input_count {
            let zeros = tract_ndarray::Array2::<i64>::zeros((1, MAX_SEQ_LEN));
            inputs.push(zeros.into_dyn().into());
        }

        let outputs = inner
            .plan
            .run(inputs)
            .map_err(|e| EngineError::Embedding(format!("inference failed: {e}")))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        match view.ndim() {
            // Export already pools: [1, dim].
            2 => Ok(view.iter().copied().collect()),
            // Raw hidden states: [1, seq, dim] — mean-pool over the mask.
            3 => {
                let seq = view.shape()[1].min(MAX_SEQ_LEN);
                let dim = view.shape()[2];
                let mut pooled = vec![0.0f32; dim];
                let mut count = 0.0f32;
                for t in 0..seq {
                    if attention_mask[t] == 1 {
                        count += 1.0;
                        for d in 0..dim {
                            pooled[d] += view[[0, t, d]];
                        }
                    }
                }
                if count > 0.0 {
                    for value in &mut pooled {
                        *value /= count;
                    }
                }
                Ok(pooled)
            }
            n => Err(EngineError::Embedding(format!(
                "unexpected model output rank {n}"
            ))),
        }
    }
}

#[async_trait]
impl TextEncoder for OnnxTextEmbedder {
    async fn encode(&self, texts: &[String], batch_size: Option<usize>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = batch_size.unwrap_or(self.default_batch_size).max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch) {
            let inner = Arc::clone(&self.inner);
            let chunk: Vec<String> = chunk.to_vec();
            let encoded = tokio::task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|text| Self::encode_one(&inner, text))
                    .collect::<Result<Vec<_>>>()
            })
            .await
            .map_err(|e| EngineError::Embedding(format!("encode task failed: {e}")))??;
            vectors.extend(encoded);
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }
}
