use async_trait::async_trait;
use model2vec_rs::model::StaticModel;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::error::{CoreError, Result};
use crate::token::lexical_tokens;

/// Prefix attached to chunk text before embedding. Retrieval-tuned static
/// models score passage/query pairs; document reconstruction strips it.
pub const PASSAGE_PREFIX: &str = "passage: ";
/// Prefix attached to query text before embedding.
pub const QUERY_PREFIX: &str = "query: ";

/// Maps a batch of strings to a batch of fixed-dimension vectors.
///
/// Contract: output length equals input length, every vector has
/// `dimensions()` components, and the same input string produces
/// bit-identical vectors within a single run. Implementations may be called
/// concurrently from multiple workers.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn name(&self) -> &'static str;
}

/// Validate the embed contract on behalf of callers; a violation is a
/// permanent embed failure (no retry will fix a model returning the wrong
/// shape).
pub fn check_batch(input_len: usize, out: &[Vec<f32>], dims: usize) -> Result<()> {
    if out.len() != input_len {
        return Err(CoreError::embed_permanent(format!(
            "embedder returned {} vectors for {} inputs",
            out.len(),
            input_len
        )));
    }
    if let Some(bad) = out.iter().find(|v| v.len() != dims) {
        return Err(CoreError::embed_permanent(format!(
            "embedding dimension {} does not match store dimension {}",
            bad.len(),
            dims
        )));
    }
    Ok(())
}

/// Local embeddings via a Model2Vec static model from the HuggingFace Hub.
pub struct StaticModelEmbedder {
    model: StaticModel,
    dimensions: usize,
}

impl StaticModelEmbedder {
    pub fn load(model_id: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .map_err(|e| CoreError::embed_permanent(format!("loading {model_id}: {e}")))?;
        // Static models do not expose their dimension; probe once.
        let dimensions = model.encode_single("dimension probe").len();
        Ok(Self { model, dimensions })
    }
}

#[async_trait]
impl Embedder for StaticModelEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let out: Vec<Vec<f32>> = batch.iter().map(|s| self.model.encode_single(s)).collect();
        check_batch(batch.len(), &out, self.dimensions)?;
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "model2vec"
    }
}

/// Deterministic feature-hashed embeddings for offline and test use.
///
/// Each lexical token lands in a bucket chosen by xxh3; a second hash picks
/// the sign. Vectors are L2-normalized. No model download, bit-stable across
/// runs and platforms.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in lexical_tokens(text) {
            let h = xxh3_64_with_seed(token.as_bytes(), 0x5eed);
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let out: Vec<Vec<f32>> = batch.iter().map(|s| self.encode(s)).collect();
        check_batch(batch.len(), &out, self.dimensions)?;
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}
