use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Text,
    Image,
}

/// Layout coordinates of a span on its page. Only used to interleave
/// text/image reading order; extraction backends that cannot recover layout
/// leave it unset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub enum SpanPayload {
    Text(String),
    Image(Vec<u8>),
}

/// One atomic extracted unit of a document. Spans from one document are
/// totally ordered by `(page_index, sequence_index)`.
#[derive(Debug, Clone)]
pub struct Span {
    pub page_index: u32,
    pub sequence_index: u32,
    pub payload: SpanPayload,
    pub bounding_region: Option<BoundingRegion>,
}

impl Span {
    pub fn kind(&self) -> SpanKind {
        match self.payload {
            SpanPayload::Text(_) => SpanKind::Text,
            SpanPayload::Image(_) => SpanKind::Image,
        }
    }

    pub fn order_key(&self) -> (u32, u32) {
        (self.page_index, self.sequence_index)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            SpanPayload::Text(text) => Some(text),
            SpanPayload::Image(_) => None,
        }
    }

    pub fn image_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            SpanPayload::Text(_) => None,
            SpanPayload::Image(bytes) => Some(bytes),
        }
    }
}

/// An image span resolved through the vision model. A failed description
/// degrades to an empty placeholder instead of blocking the pipeline.
#[derive(Debug, Clone)]
pub struct DescribedSpan {
    pub span: Span,
    pub description: String,
    pub context_excerpt: String,
    pub description_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    /// First and last span indices (inclusive) this chunk covers.
    pub span_start: usize,
    pub span_end: usize,
    pub page_start: u32,
    pub page_end: u32,
    pub contains_image: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub contains_image: bool,
}

/// A chunk plus its vector. Created once per chunk and immutable after;
/// re-ingesting identical content regenerates identical chunk ids, so the
/// store upsert replaces rather than duplicates.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            document_id: self.chunk.document_id.clone(),
            page_start: self.chunk.page_start,
            page_end: self.chunk.page_end,
            contains_image: self.chunk.contains_image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Extracting,
    DescribingImages,
    Chunking,
    Embedding,
    Storing,
    Complete,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Extracting => "extracting",
            IngestStatus::DescribingImages => "describing_images",
            IngestStatus::Chunking => "chunking",
            IngestStatus::Embedding => "embedding",
            IngestStatus::Storing => "storing",
            IngestStatus::Complete => "complete",
            IngestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPage {
    pub page_index: u32,
    pub reason: String,
}

/// The only artifact an ingestion run returns to its caller. Produced for
/// failed runs as well, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub status: IngestStatus,
    pub error: Option<String>,
    pub chunks_produced: usize,
    pub images_described: usize,
    pub images_failed: usize,
    pub pages_skipped: Vec<SkippedPage>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    EmbeddingQuery,
    Searching,
    AssemblingContext,
    Synthesizing,
    Complete,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::EmbeddingQuery => "embedding_query",
            QueryStatus::Searching => "searching",
            QueryStatus::AssemblingContext => "assembling_context",
            QueryStatus::Synthesizing => "synthesizing",
            QueryStatus::Complete => "complete",
            QueryStatus::Failed => "failed",
        }
    }
}

/// Restricts retrieval to one document and/or to chunks that carry a figure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub document_id: Option<String>,
    pub contains_image: Option<bool>,
}

impl SearchFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(document_id) = &self.document_id {
            if metadata.document_id != *document_id {
                return false;
            }
        }
        if let Some(contains_image) = self.contains_image {
            if metadata.contains_image != contains_image {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    pub contains_image: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResult {
    pub question: String,
    pub answer: String,
    pub cited_chunks: Vec<Citation>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub retry_limit: usize,
    pub backoff_base: Duration,
    /// Fixed once a corpus exists; changing it requires full re-ingestion.
    pub embedding_dimensions: usize,
    pub embed_batch_size: usize,
    /// Character budget for the text window handed to the vision model.
    pub describe_context_chars: usize,
    /// Character budget for the assembled answer context.
    pub context_char_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 4,
            retry_limit: 3,
            backoff_base: Duration::from_millis(500),
            embedding_dimensions: 128,
            embed_batch_size: 64,
            describe_context_chars: 600,
            context_char_budget: 6_000,
        }
    }
}

impl PipelineConfig {
    /// Configuration errors are detected at construction, not at chunk time.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "chunk_overlap {} must be strictly less than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig("top_k must be positive".to_string()));
        }
        if self.embedding_dimensions == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding_dimensions must be positive".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "embed_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
