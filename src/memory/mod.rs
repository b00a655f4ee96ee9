//! Vector memory of past exchanges
//!
//! Every answered prompt is stored as a [`MemoryRecord`] carrying the
//! embedding of `"<input> <response>"`. New prompts retrieve the most similar
//! past exchanges through [`RetrievalAugmenter`] and get written back through
//! [`MemoryRecorder`] once the reply exists.

mod augment;
mod embedder;
mod sqlite;

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub use augment::{MemoryRecorder, RetrievalAugmenter};
pub use embedder::{
    Embedder, HASHING_EMBEDDING_DIM, HashingEmbedder, OPENAI_EMBEDDING_DIM, OpenAiEmbedder,
};
pub use sqlite::SqliteVectorStore;

/// Which interface produced an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Text,
    Voice,
}

impl MemorySource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }

    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive fields stored alongside an embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub input: String,
    pub response: String,

    /// Unix seconds
    pub timestamp: f64,

    pub source: MemorySource,

    /// Synthesized reply, only for recorded voice exchanges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// A stored exchange; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,

    /// Retrievable document, `"<input> <response>"`
    pub text: String,

    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
}

impl MemoryRecord {
    /// Build a record for one exchange with a fresh id and the current time
    #[must_use]
    pub fn new(
        input: &str,
        response: &str,
        embedding: Vec<f32>,
        source: MemorySource,
        audio_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: combined_text(input, response),
            embedding,
            metadata: MemoryMetadata {
                input: input.to_string(),
                response: response.to_string(),
                timestamp: unix_timestamp(),
                source,
                audio_url,
            },
        }
    }
}

/// The document text embedded for an exchange
#[must_use]
pub fn combined_text(input: &str, response: &str) -> String {
    format!("{input} {response}")
}

/// Current time as fractional unix seconds
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Persistence and nearest-neighbour lookup over [`MemoryRecord`]s
///
/// Implementations fix their embedding width at construction and reject
/// anything else on both `add` and `query`.
pub trait VectorStore: Send + Sync {
    /// Append a record. No duplicate-id protection.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` for a wrongly sized embedding, or a
    /// backend error
    fn add(&self, record: MemoryRecord) -> Result<()>;

    /// Texts of the `k` most similar records, most similar first
    ///
    /// Ties keep insertion order. An empty store yields an empty vec.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` for a wrongly sized embedding, or a
    /// backend error
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<String>>;

    /// Every stored record, in no particular order
    ///
    /// # Errors
    ///
    /// Returns a backend error
    fn get_all(&self) -> Result<Vec<MemoryRecord>>;

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns a backend error
    fn len(&self) -> Result<usize>;

    /// Whether the store holds no records
    ///
    /// # Errors
    ///
    /// Returns a backend error
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fixed embedding width
    fn dimension(&self) -> usize;
}

pub(crate) const fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

/// Process-local store with a brute-force cosine scan
#[derive(Debug)]
pub struct InMemoryVectorStore {
    dimension: usize,
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add(&self, record: MemoryRecord) -> Result<()> {
        check_dimension(self.dimension, record.embedding.len())?;
        self.records.write().push(record);
        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<String>> {
        check_dimension(self.dimension, embedding.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let records = self.records.read();
        let mut scored: Vec<(usize, f32)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, cosine_similarity(embedding, &r.embedding)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, _)| records[i].text.clone())
            .collect())
    }

    fn get_all(&self) -> Result<Vec<MemoryRecord>> {
        Ok(self.records.read().clone())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]` where 1.0 is identical direction.
/// Returns 0.0 if either vector has zero magnitude.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (ai, bi) in a.iter().zip(b.iter()) {
        let ai = f64::from(*ai);
        let bi = f64::from(*bi);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Serialize embedding to little-endian bytes for `SQLite` storage
#[must_use]
pub fn to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from bytes
#[must_use]
pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(text, "reply", embedding, MemorySource::Text, None)
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let embedding = vec![1.0, 2.5, -3.25, 0.0, 100.0];
        let restored = from_bytes(&to_bytes(&embedding));
        assert_eq!(embedding, restored);
    }

    #[test]
    fn test_combined_text() {
        let r = record("what is an ETF", vec![1.0, 0.0]);
        assert_eq!(r.text, "what is an ETF reply");
        assert_eq!(r.metadata.source, MemorySource::Text);
        assert!(r.metadata.timestamp > 0.0);
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let store = InMemoryVectorStore::new(2);
        store.add(record("far", vec![0.0, 1.0])).unwrap();
        store.add(record("near", vec![1.0, 0.1])).unwrap();
        store.add(record("middle", vec![1.0, 1.0])).unwrap();

        let hits = store.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits, vec!["near reply", "middle reply"]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let store = InMemoryVectorStore::new(2);
        store.add(record("first", vec![1.0, 0.0])).unwrap();
        store.add(record("second", vec![2.0, 0.0])).unwrap();
        store.add(record("third", vec![3.0, 0.0])).unwrap();

        let hits = store.query(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits, vec!["first reply", "second reply", "third reply"]);
    }

    #[test]
    fn test_empty_store_query() {
        let store = InMemoryVectorStore::new(3);
        assert!(store.query(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_dimension_mismatch() {
        let store = InMemoryVectorStore::new(3);
        let err = store.add(record("x", vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));

        let err = store.query(&[1.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 1 }));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MemorySource::Voice).unwrap(), "\"voice\"");
        assert_eq!(MemorySource::from_str_value("text"), Some(MemorySource::Text));
        assert_eq!(MemorySource::from_str_value("fax"), None);
    }
}
