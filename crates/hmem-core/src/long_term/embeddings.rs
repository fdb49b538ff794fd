//! Text embeddings for long-term similarity search.
//!
//! Embedders are synchronous and CPU bound; the long-term store only calls
//! them from its blocking worker pool.
//!
//! - [`HashEmbedder`]: feature hashing over lowercased tokens. Deterministic,
//!   dependency free, and good enough for keyword-style recall.
//! - `FastEmbedder` (feature `embeddings`): local ONNX sentence models via
//!   `fastembed`, loaded on first use.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Default dimension for [`HashEmbedder`].
pub const HASH_EMBEDDING_DIMENSIONS: usize = 256;

/// Turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Model identifier for logs.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Mismatched lengths and zero vectors are treated as orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 1.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}

/// Signed feature hashing of lowercased words.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIMENSIONS)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

#[cfg(feature = "embeddings")]
pub use self::fast::FastEmbedder;

#[cfg(feature = "embeddings")]
mod fast {
    use std::sync::{Arc, Mutex, PoisonError};

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tracing::info;

    use super::Embedder;
    use crate::error::{MemoryError, Result};

    /// Sentence embeddings from a local `fastembed` model.
    pub struct FastEmbedder {
        name: String,
        model_name: EmbeddingModel,
        dimension: usize,
        model: Mutex<Option<Arc<TextEmbedding>>>,
    }

    impl FastEmbedder {
        /// Resolve a model by its common name, e.g. `all-MiniLM-L6-v2`.
        pub fn from_model_str(name: &str) -> Result<Self> {
            let (model_name, dimension) = match name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "all-MiniLM-L12-v2" | "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
                "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
                "bge-large-en-v1.5" | "BGELargeENV15" => (EmbeddingModel::BGELargeENV15, 1024),
                "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => {
                    (EmbeddingModel::NomicEmbedTextV15, 768)
                }
                other => {
                    return Err(MemoryError::Embedding(format!(
                        "unsupported embedding model: {other}"
                    )));
                }
            };

            Ok(Self {
                name: name.to_string(),
                model_name,
                dimension,
                model: Mutex::new(None),
            })
        }

        fn model(&self) -> Result<Arc<TextEmbedding>> {
            let mut slot = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(model) = slot.as_ref() {
                return Ok(Arc::clone(model));
            }

            info!(model = %self.name, "Loading embedding model");
            let start = std::time::Instant::now();

            let mut options = InitOptions::default();
            options.model_name = self.model_name.clone();
            options.show_download_progress = false;

            let model = TextEmbedding::try_new(options)
                .map_err(|e| MemoryError::Embedding(format!("failed to load {}: {e}", self.name)))?;
            info!(model = %self.name, elapsed = ?start.elapsed(), "Embedding model loaded");

            let model = Arc::new(model);
            *slot = Some(Arc::clone(&model));
            Ok(model)
        }
    }

    impl Embedder for FastEmbedder {
        fn name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let model = self.model()?;
            model
                .embed(vec![text], None)
                .map_err(|e| MemoryError::Embedding(format!("failed to embed text: {e}")))?
                .into_iter()
                .next()
                .ok_or_else(|| MemoryError::Embedding("model returned no embedding".to_string()))
        }
    }
}

/// Pick an embedder for a configured model name.
///
/// `hash` selects [`HashEmbedder`]. Other names need the `embeddings`
/// feature; without it the hash embedder is used instead.
pub fn embedder_for(model: &str) -> Result<Arc<dyn Embedder>> {
    if model.eq_ignore_ascii_case("hash") {
        return Ok(Arc::new(HashEmbedder::default()));
    }

    #[cfg(feature = "embeddings")]
    {
        Ok(Arc::new(FastEmbedder::from_model_str(model)?))
    }

    #[cfg(not(feature = "embeddings"))]
    {
        tracing::warn!(
            model,
            "Built without the embeddings feature, falling back to hash embeddings"
        );
        Ok(Arc::new(HashEmbedder::default()))
    }
}
