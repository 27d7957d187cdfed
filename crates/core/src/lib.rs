pub mod describer;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod fusion;
pub mod ingestion;
pub mod models;
pub mod query;
pub mod retry;
pub mod store;
pub mod stores;

pub use describer::{
    context_window, ContextWindow, DescriptionOutcome, DisabledVision, HttpVisionModel,
    ImageDescriber, VisionModel,
};
pub use embedder::{BatchingEmbedder, EmbeddingModel, HashEmbedding, HttpEmbeddingModel};
pub use error::{IngestError, ProviderError, QueryError, StoreError};
pub use extractor::{Extraction, LopdfExtractor, SpanExtractor};
pub use fusion::{fuse_chunks, ChunkingConfig, FusedSpan, FIGURE_CLOSE, FIGURE_OPEN};
pub use ingestion::{discover_pdf_files, document_id_for_path, IngestionPipeline};
pub use models::{
    AskResult, BoundingRegion, Chunk, ChunkMetadata, Citation, DescribedSpan, EmbeddedChunk,
    IngestStatus, IngestSummary, PipelineConfig, QueryStatus, SearchFilter, SearchHit, SkippedPage,
    Span, SpanKind, SpanPayload,
};
pub use query::{assemble_context, AnswerModel, HttpAnswerModel, QueryPipeline, NO_CONTEXT_ANSWER};
pub use retry::RetryPolicy;
pub use store::{rank_hits, CorpusStore};
pub use stores::{MemoryStore, QdrantStore};
