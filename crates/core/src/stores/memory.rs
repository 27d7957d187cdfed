use crate::error::StoreError;
use crate::models::{EmbeddedChunk, SearchFilter, SearchHit};
use crate::store::{rank_hits, CorpusStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory cosine-similarity store. Keeps the pipeline runnable without a
/// vector database and backs most of the test suite. Cloning shares the
/// underlying corpus.
#[derive(Clone, Default)]
pub struct MemoryStore {
    chunks: Arc<RwLock<HashMap<String, EmbeddedChunk>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm: f32 = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm: f32 = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    dot / (left_norm * right_norm + 1e-10)
}

#[async_trait]
impl CorpusStore for MemoryStore {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<(), StoreError> {
        let mut guard = self.chunks.write().await;
        for chunk in chunks {
            guard.insert(chunk.chunk.chunk_id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let guard = self.chunks.read().await;
        let hits = guard
            .values()
            .filter(|embedded| filter.matches(&embedded.metadata()))
            .map(|embedded| SearchHit {
                chunk_id: embedded.chunk.chunk_id.clone(),
                document_id: embedded.chunk.document_id.clone(),
                score: cosine_similarity(vector, &embedded.vector),
                text: embedded.chunk.text.clone(),
                page_start: embedded.chunk.page_start,
                page_end: embedded.chunk.page_end,
                contains_image: embedded.chunk.contains_image,
            })
            .collect();

        Ok(rank_hits(hits, top_k))
    }

    async fn delete(&self, document_id: &str) -> Result<(), StoreError> {
        let mut guard = self.chunks.write().await;
        guard.retain(|_, embedded| embedded.chunk.document_id != document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn embedded(chunk_id: &str, document_id: &str, vector: Vec<f32>, contains_image: bool) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                chunk_id: chunk_id.to_string(),
                document_id: document_id.to_string(),
                text: format!("text of {chunk_id}"),
                span_start: 0,
                span_end: 0,
                page_start: 0,
                page_end: 0,
                contains_image,
            },
            vector,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_chunk_id() {
        let store = MemoryStore::new();
        let chunk = embedded("chunk-1", "doc-1", vec![1.0, 0.0], false);

        store.upsert(&[chunk.clone()]).await.unwrap();
        store.upsert(&[chunk]).await.unwrap();

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                embedded("near", "doc-1", vec![1.0, 0.0], false),
                embedded("far", "doc-1", vec![0.0, 1.0], false),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 2, &SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(hits[0].chunk_id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_honours_filters() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                embedded("a", "doc-1", vec![1.0, 0.0], true),
                embedded("b", "doc-1", vec![1.0, 0.0], false),
                embedded("c", "doc-2", vec![1.0, 0.0], true),
            ])
            .await
            .unwrap();

        let filter = SearchFilter {
            document_id: Some("doc-1".to_string()),
            contains_image: Some(true),
        };
        let hits = store.search(&[1.0, 0.0], 10, &filter).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn delete_removes_only_the_named_document() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                embedded("a", "doc-1", vec![1.0, 0.0], false),
                embedded("b", "doc-2", vec![1.0, 0.0], false),
            ])
            .await
            .unwrap();

        store.delete("doc-1").await.unwrap();

        assert_eq!(store.len().await, 1);
        let hits = store
            .search(&[1.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].document_id, "doc-2");
    }

    #[tokio::test]
    async fn identical_scores_order_by_chunk_id() {
        let store = MemoryStore::new();
        store
            .upsert(&[
                embedded("zz", "doc-1", vec![1.0, 0.0], false),
                embedded("aa", "doc-1", vec![1.0, 0.0], false),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, "aa");
        assert_eq!(hits[1].chunk_id, "zz");
    }
}
