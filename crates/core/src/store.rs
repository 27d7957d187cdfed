use crate::error::StoreError;
use crate::models::{EmbeddedChunk, SearchFilter, SearchHit};
use async_trait::async_trait;
use std::sync::Arc;

/// The one shared-mutable resource of the system. `upsert` is idempotent by
/// chunk id and atomic per chunk; `search` may run concurrently with
/// unrelated upserts and never observes a half-written chunk.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<(), StoreError>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Removes every chunk of one document, for cleanup and re-ingestion.
    async fn delete(&self, document_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: CorpusStore + ?Sized> CorpusStore for Arc<S> {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<(), StoreError> {
        (**self).upsert(chunks).await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError> {
        (**self).search(vector, top_k, filter).await
    }

    async fn delete(&self, document_id: &str) -> Result<(), StoreError> {
        (**self).delete(document_id).await
    }
}

/// Descending score, ties broken by ascending chunk id so results are
/// deterministic across runs and backends.
pub fn rank_hits(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    hits.truncate(top_k);
    hits
}
