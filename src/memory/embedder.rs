//! Text embedding for semantic memory search

use async_trait::async_trait;

use crate::{Error, Result};

/// Embedding dimension for text-embedding-3-small
pub const OPENAI_EMBEDDING_DIM: usize = 1536;

/// Default width of the local hashing embedder
pub const HASHING_EMBEDDING_DIM: usize = 384;

/// Maps text to a fixed-width dense vector
///
/// Identical input yields identical output. Vectors are L2-normalised so
/// cosine similarity is the meaningful metric across providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Width of every returned vector
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts, in input order
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the model cannot produce vectors
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate embedding for a single text
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the model cannot produce a vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelUnavailable("empty embedding response".to_string()))
    }
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    /// Create an embedder for `text-embedding-3-small` on api.openai.com
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(
            api_key,
            "https://api.openai.com/v1".to_string(),
            "text-embedding-3-small".to_string(),
            OPENAI_EMBEDDING_DIM,
        )
    }

    /// Create an embedder with a custom endpoint and model
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn with_model(
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for embeddings".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [&'a str],
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelUnavailable(format!(
                "embedding API error {status}: {body}"
            )));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

        if result.data.len() != texts.len() {
            return Err(Error::ModelUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index to maintain input order
        result.data.sort_by_key(|d| d.index);

        result
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() == self.dimension {
                    Ok(d.embedding)
                } else {
                    Err(Error::ModelUnavailable(format!(
                        "expected {}-dim embedding, got {}",
                        self.dimension,
                        d.embedding.len()
                    )))
                }
            })
            .collect()
    }
}

/// Offline embedder using signed feature hashing
///
/// Lower-cased alphanumeric tokens and adjacent-token bigrams are hashed with
/// FNV-1a into `dimension` buckets. The top hash bit picks the sign so
/// collisions tend to cancel rather than accumulate.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// A zero dimension is bumped to one
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed synchronously
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut vector = vec![0.0_f32; self.dimension];
        let mut add = |feature: &[u8]| {
            let hash = fnv1a(feature);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        };

        for token in &tokens {
            add(token.as_bytes());
        }
        for pair in tokens.windows(2) {
            add(format!("{} {}", pair[0], pair[1]).as_bytes());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_EMBEDDING_DIM)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cosine_similarity;

    #[test]
    fn test_empty_api_key() {
        assert!(OpenAiEmbedder::new(String::new()).is_err());
    }

    #[test]
    fn test_hashing_is_deterministic() {
        let e = HashingEmbedder::default();
        assert_eq!(e.embed_sync("Index funds"), e.embed_sync("index  FUNDS!"));
        assert_eq!(e.embed_sync("x").len(), HASHING_EMBEDDING_DIM);
    }

    #[test]
    fn test_hashing_is_normalised() {
        let v = HashingEmbedder::new(64).embed_sync("emergency fund savings account");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_similarity_follows_overlap() {
        let e = HashingEmbedder::default();
        let query = e.embed_sync("what are index funds");
        let related = e.embed_sync("index funds track a market index");
        let unrelated = e.embed_sync("mortgage refinancing rates");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_blank_text_is_zero_vector() {
        let v = HashingEmbedder::new(8).embed_sync("  ...  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_trait_embed_uses_batch() {
        let e = HashingEmbedder::new(16);
        let single = e.embed("budget").await.unwrap();
        assert_eq!(single, e.embed_sync("budget"));
    }
}
