//! Read and write paths over the vector memory
//!
//! Callers augment first, produce a reply, then record. Augmenting never
//! writes.

use std::sync::Arc;

use super::{Embedder, MemoryRecord, MemorySource, VectorStore, combined_text};

/// Retrieves past exchanges similar to a query
#[derive(Clone)]
pub struct RetrievalAugmenter {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalAugmenter {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Up to `k` similar past exchanges joined by blank lines
    ///
    /// Any embedding or store failure degrades to an empty string.
    pub async fn augment(&self, query_text: &str, k: usize) -> String {
        let embedding = match self.embedder.embed(query_text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, continuing without context");
                return String::new();
            }
        };

        match self.store.query(&embedding, k) {
            Ok(hits) => {
                tracing::debug!(hits = hits.len(), k, "retrieved memory context");
                hits.join("\n\n")
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory query failed, continuing without context");
                String::new()
            }
        }
    }
}

impl std::fmt::Debug for RetrievalAugmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAugmenter")
            .field("dimension", &self.embedder.dimension())
            .finish_non_exhaustive()
    }
}

/// Writes finished exchanges into the vector memory
#[derive(Clone)]
pub struct MemoryRecorder {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl MemoryRecorder {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Store one exchange; returns whether the write succeeded
    ///
    /// The reply already exists when this runs, so failures are logged and
    /// never propagated.
    pub async fn record(
        &self,
        input: &str,
        response: &str,
        source: MemorySource,
        audio_url: Option<String>,
    ) -> bool {
        let embedding = match self.embedder.embed(&combined_text(input, response)).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, %source, "failed to embed exchange, not recorded");
                return false;
            }
        };

        let record = MemoryRecord::new(input, response, embedding, source, audio_url);
        let id = record.id;
        match self.store.add(record) {
            Ok(()) => {
                tracing::debug!(%id, %source, "exchange recorded");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, %source, "failed to store exchange");
                false
            }
        }
    }

    /// Every stored exchange, newest first
    ///
    /// # Errors
    ///
    /// Returns the store's error
    pub fn history(&self) -> crate::Result<Vec<MemoryRecord>> {
        let mut records = self.store.get_all()?;
        records.sort_by(|a, b| b.metadata.timestamp.total_cmp(&a.metadata.timestamp));
        Ok(records)
    }
}

impl std::fmt::Debug for MemoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecorder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::memory::{HashingEmbedder, InMemoryVectorStore};
    use crate::{Error, Result};

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(Error::ModelUnavailable("offline".to_string()))
        }
    }

    fn pair(dim: usize) -> (RetrievalAugmenter, MemoryRecorder, Arc<InMemoryVectorStore>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(dim));
        let store = Arc::new(InMemoryVectorStore::new(dim));
        (
            RetrievalAugmenter::new(embedder.clone(), store.clone()),
            MemoryRecorder::new(embedder, store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn test_augment_empty_store() {
        let (augmenter, _, _) = pair(64);
        assert_eq!(augmenter.augment("anything", 3).await, "");
    }

    #[tokio::test]
    async fn test_augment_joins_hits() {
        let (augmenter, recorder, _) = pair(128);
        assert!(recorder.record("index funds", "low fees", MemorySource::Text, None).await);
        assert!(recorder.record("bond ladders", "stagger maturities", MemorySource::Text, None).await);

        let ctx = augmenter.augment("index funds", 2).await;
        assert!(ctx.starts_with("index funds low fees"));
        assert!(ctx.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_embedder_failure_degrades() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(8));
        let augmenter = RetrievalAugmenter::new(Arc::new(BrokenEmbedder), store.clone());
        let recorder = MemoryRecorder::new(Arc::new(BrokenEmbedder), store.clone());

        assert_eq!(augmenter.augment("q", 3).await, "");
        assert!(!recorder.record("q", "a", MemorySource::Text, None).await);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_degrades() {
        // Embedder and store disagree on width, so every query fails
        let augmenter = RetrievalAugmenter::new(
            Arc::new(HashingEmbedder::new(16)),
            Arc::new(InMemoryVectorStore::new(32)),
        );
        assert_eq!(augmenter.augment("q", 3).await, "");
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (_, recorder, store) = pair(16);
        let mut old = MemoryRecord::new("old", "a", vec![0.0; 16], MemorySource::Text, None);
        old.metadata.timestamp = 1.0;
        let mut new = MemoryRecord::new("new", "b", vec![0.0; 16], MemorySource::Voice, None);
        new.metadata.timestamp = 2.0;
        store.add(old).unwrap();
        store.add(new).unwrap();

        let history = recorder.history().unwrap();
        assert_eq!(history[0].metadata.input, "new");
        assert_eq!(history[1].metadata.input, "old");
    }
}
