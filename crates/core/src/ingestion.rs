use crate::describer::{context_window, DescriptionOutcome, ImageDescriber, VisionModel};
use crate::embedder::{BatchingEmbedder, EmbeddingModel};
use crate::error::IngestError;
use crate::fusion::{fuse_chunks, ChunkingConfig, FusedSpan};
use crate::models::{
    DescribedSpan, EmbeddedChunk, IngestStatus, IngestSummary, PipelineConfig, SkippedPage, Span,
    SpanPayload,
};
use crate::retry::RetryPolicy;
use crate::store::CorpusStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Drives one document through extraction, image description, fusion,
/// embedding, and storage. State moves strictly forward; `ingest` always
/// returns a summary, even for failed runs.
pub struct IngestionPipeline<X, V, M, S> {
    extractor: X,
    describer: ImageDescriber<V>,
    embedder: BatchingEmbedder<M>,
    store: S,
    config: PipelineConfig,
}

impl<X, V, M, S> IngestionPipeline<X, V, M, S>
where
    X: crate::extractor::SpanExtractor,
    V: VisionModel,
    M: EmbeddingModel,
    S: CorpusStore,
{
    pub fn new(
        extractor: X,
        vision: V,
        embedding: M,
        store: S,
        config: PipelineConfig,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let retry = RetryPolicy::new(config.retry_limit, config.backoff_base);
        Ok(Self {
            extractor,
            describer: ImageDescriber::new(vision, retry),
            embedder: BatchingEmbedder::new(embedding, config.embed_batch_size, retry),
            store,
            config,
        })
    }

    pub async fn ingest(&self, document_id: &str, pdf_bytes: &[u8]) -> IngestSummary {
        let mut run = IngestionRun::new(document_id);

        run.advance(IngestStatus::Extracting);
        let extraction = match self.extractor.extract(pdf_bytes) {
            Ok(extraction) => extraction,
            Err(error) => return run.fail(error),
        };
        run.pages_skipped = extraction.skipped_pages;

        run.advance(IngestStatus::DescribingImages);
        let fused = self.resolve_images(&extraction.spans, &mut run).await;

        run.advance(IngestStatus::Chunking);
        let chunks = fuse_chunks(document_id, &fused, ChunkingConfig::from(&self.config));
        run.chunks_produced = chunks.len();
        if chunks.is_empty() {
            // a document with nothing extractable is complete, not failed
            return run.complete();
        }

        run.advance(IngestStatus::Embedding);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = match self.embedder.embed_all(&texts).await {
            Ok(vectors) => vectors,
            Err(error) => return run.fail(IngestError::Embedding(error.to_string())),
        };

        run.advance(IngestStatus::Storing);
        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();
        if let Err(error) = self.store.upsert(&embedded).await {
            return run.fail(error.into());
        }

        run.complete()
    }

    /// Fans description requests out concurrently across the document's
    /// images and joins them before fusion. A failed description degrades to
    /// an empty placeholder and a counter, never a failed run.
    async fn resolve_images(&self, spans: &[Span], run: &mut IngestionRun) -> Vec<FusedSpan> {
        let jobs = spans.iter().enumerate().filter_map(|(index, span)| {
            span.image_bytes().map(|image| {
                let window = context_window(spans, index, self.config.describe_context_chars);
                async move {
                    let outcome = self.describer.describe(image, &window).await;
                    (index, window.excerpt(), outcome)
                }
            })
        });

        let mut described: HashMap<usize, DescribedSpan> = HashMap::new();
        for (index, context_excerpt, outcome) in futures::future::join_all(jobs).await {
            let (description, description_failed) = match outcome {
                DescriptionOutcome::Described(text) => (text, false),
                DescriptionOutcome::Failed(_) => (String::new(), true),
            };
            described.insert(
                index,
                DescribedSpan {
                    span: spans[index].clone(),
                    description,
                    context_excerpt,
                    description_failed,
                },
            );
        }

        spans
            .iter()
            .enumerate()
            .map(|(index, span)| match &span.payload {
                SpanPayload::Text(text) => FusedSpan::Text {
                    span_index: index,
                    page_index: span.page_index,
                    text: text.clone(),
                },
                SpanPayload::Image(_) => {
                    let resolved = described.get(&index);
                    let failed = resolved.map_or(true, |d| d.description_failed);
                    if failed {
                        run.images_failed += 1;
                    } else {
                        run.images_described += 1;
                    }
                    FusedSpan::Figure {
                        span_index: index,
                        page_index: span.page_index,
                        description: resolved.map(|d| d.description.clone()).unwrap_or_default(),
                    }
                }
            })
            .collect()
    }

    /// Walks a folder recursively and ingests every PDF in it, best effort:
    /// an unreadable file becomes a failed summary, not an aborted batch.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<Vec<IngestSummary>, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut summaries = Vec::new();
        for path in files {
            let document_id = document_id_for_path(&path);
            match std::fs::read(&path) {
                Ok(bytes) => summaries.push(self.ingest(&document_id, &bytes).await),
                Err(error) => {
                    summaries.push(IngestionRun::new(&document_id).fail(error.into()));
                }
            }
        }
        Ok(summaries)
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn document_id_for_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

struct IngestionRun {
    document_id: String,
    status: IngestStatus,
    chunks_produced: usize,
    images_described: usize,
    images_failed: usize,
    pages_skipped: Vec<SkippedPage>,
}

impl IngestionRun {
    fn new(document_id: &str) -> Self {
        tracing::info!(document_id, "ingestion run started");
        Self {
            document_id: document_id.to_string(),
            status: IngestStatus::Pending,
            chunks_produced: 0,
            images_described: 0,
            images_failed: 0,
            pages_skipped: Vec::new(),
        }
    }

    fn advance(&mut self, next: IngestStatus) {
        tracing::info!(
            document_id = %self.document_id,
            from = self.status.as_str(),
            to = next.as_str(),
            "ingestion transition"
        );
        self.status = next;
    }

    fn complete(mut self) -> IngestSummary {
        self.advance(IngestStatus::Complete);
        self.into_summary(None)
    }

    fn fail(mut self, error: IngestError) -> IngestSummary {
        tracing::error!(
            document_id = %self.document_id,
            stage = self.status.as_str(),
            error = %error,
            "ingestion run failed"
        );
        self.advance(IngestStatus::Failed);
        self.into_summary(Some(error.to_string()))
    }

    fn into_summary(self, error: Option<String>) -> IngestSummary {
        IngestSummary {
            document_id: self.document_id,
            status: self.status,
            error,
            chunks_produced: self.chunks_produced,
            images_described: self.images_described,
            images_failed: self.images_failed,
            pages_skipped: self.pages_skipped,
            ingested_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describer::VisionModel;
    use crate::embedder::HashEmbedding;
    use crate::error::ProviderError;
    use crate::extractor::{Extraction, SpanExtractor};
    use crate::fusion::{FIGURE_CLOSE, FIGURE_OPEN};
    use crate::models::SearchFilter;
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FakeExtractor {
        extraction: Option<Extraction>,
    }

    impl SpanExtractor for FakeExtractor {
        fn extract(&self, pdf_bytes: &[u8]) -> Result<Extraction, IngestError> {
            if pdf_bytes == b"broken" {
                return Err(IngestError::PdfParse("unreadable".to_string()));
            }
            self.extraction
                .clone()
                .ok_or_else(|| IngestError::PdfParse("unreadable".to_string()))
        }
    }

    /// Describes every image except the one whose bytes match `fail_bytes`.
    struct SelectiveVision {
        fail_bytes: Vec<u8>,
    }

    #[async_trait]
    impl VisionModel for SelectiveVision {
        async fn describe(&self, image: &[u8], _prompt: &str) -> Result<String, ProviderError> {
            if image == self.fail_bytes {
                Err(ProviderError::Transient("always down".to_string()))
            } else {
                Ok(format!("figure with {} bytes", image.len()))
            }
        }
    }

    struct FatalEmbedding;

    #[async_trait]
    impl EmbeddingModel for FatalEmbedding {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Fatal("malformed input".to_string()))
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            retry_limit: 2,
            backoff_base: Duration::ZERO,
            embedding_dimensions: 16,
            ..PipelineConfig::default()
        }
    }

    fn text_span(page_index: u32, sequence_index: u32, text: &str) -> Span {
        Span {
            page_index,
            sequence_index,
            payload: SpanPayload::Text(text.to_string()),
            bounding_region: None,
        }
    }

    fn image_span(page_index: u32, sequence_index: u32, bytes: Vec<u8>) -> Span {
        Span {
            page_index,
            sequence_index,
            payload: SpanPayload::Image(bytes),
            bounding_region: None,
        }
    }

    fn lecture_extraction() -> Extraction {
        Extraction {
            spans: vec![
                text_span(0, 0, "Lecture one introduces supervised learning."),
                image_span(0, 1, vec![1; 8]),
                image_span(1, 0, vec![2; 8]),
                text_span(1, 1, "Decision boundaries separate the classes."),
                image_span(2, 0, vec![3; 8]),
            ],
            skipped_pages: Vec::new(),
        }
    }

    fn pipeline(
        extraction: Option<Extraction>,
        store: MemoryStore,
    ) -> IngestionPipeline<FakeExtractor, SelectiveVision, HashEmbedding, MemoryStore> {
        IngestionPipeline::new(
            FakeExtractor { extraction },
            SelectiveVision {
                fail_bytes: vec![2; 8],
            },
            HashEmbedding::new(16),
            store,
            test_config(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn one_failed_description_degrades_instead_of_failing_the_run() {
        let store = MemoryStore::new();
        let pipeline = pipeline(Some(lecture_extraction()), store.clone());

        let summary = pipeline.ingest("doc-1", b"ignored").await;

        assert_eq!(summary.status, IngestStatus::Complete);
        assert_eq!(summary.images_described, 2);
        assert_eq!(summary.images_failed, 1);
        assert!(summary.chunks_produced > 0);
        assert!(summary.error.is_none());

        // the failed image is present as an empty placeholder block
        let hits = store
            .search(&vec![0.1f32; 16], 100, &SearchFilter::default())
            .await
            .unwrap();
        let all_text: String = hits.iter().map(|hit| hit.text.clone()).collect();
        assert!(all_text.contains(&format!("{FIGURE_OPEN}\n\n{FIGURE_CLOSE}")));
    }

    #[tokio::test]
    async fn zero_span_document_completes_with_zero_chunks() {
        let store = MemoryStore::new();
        let pipeline = pipeline(Some(Extraction::default()), store.clone());

        let summary = pipeline.ingest("doc-empty", b"ignored").await;

        assert_eq!(summary.status, IngestStatus::Complete);
        assert_eq!(summary.chunks_produced, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn extraction_failure_produces_a_failed_summary() {
        let store = MemoryStore::new();
        let pipeline = pipeline(None, store.clone());

        let summary = pipeline.ingest("doc-bad", b"ignored").await;

        assert_eq!(summary.status, IngestStatus::Failed);
        assert!(summary.error.unwrap().contains("unreadable"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn fatal_embedding_failure_fails_the_run() {
        let store = MemoryStore::new();
        let pipeline = IngestionPipeline::new(
            FakeExtractor {
                extraction: Some(lecture_extraction()),
            },
            SelectiveVision { fail_bytes: vec![] },
            FatalEmbedding,
            store.clone(),
            test_config(),
        )
        .unwrap();

        let summary = pipeline.ingest("doc-1", b"ignored").await;

        assert_eq!(summary.status, IngestStatus::Failed);
        assert!(summary.error.unwrap().contains("malformed input"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let store = MemoryStore::new();
        let pipeline = pipeline(Some(lecture_extraction()), store.clone());

        let first = pipeline.ingest("doc-1", b"ignored").await;
        let count_after_first = store.len().await;
        let second = pipeline.ingest("doc-1", b"ignored").await;

        assert_eq!(first.chunks_produced, second.chunks_produced);
        assert_eq!(store.len().await, count_after_first);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let result = IngestionPipeline::new(
            FakeExtractor { extraction: None },
            SelectiveVision { fail_bytes: vec![] },
            HashEmbedding::new(16),
            MemoryStore::new(),
            PipelineConfig {
                chunk_size: 10,
                chunk_overlap: 10,
                ..PipelineConfig::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn pdf_discovery_is_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("b.pdf"), b"%PDF-1.4").unwrap();
        fs::write(nested.join("a.pdf"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a pdf").unwrap();

        let files = discover_pdf_files(dir.path());
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn folder_ingestion_continues_past_a_failing_document() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.pdf"), b"broken").unwrap();
        fs::write(dir.path().join("intro.pdf"), b"%PDF-1.4 fine").unwrap();

        let store = MemoryStore::new();
        let pipeline = pipeline(Some(lecture_extraction()), store.clone());

        let summaries = pipeline.ingest_folder(dir.path()).await.unwrap();

        assert_eq!(summaries.len(), 2);
        // discovery is sorted, so the broken document comes first
        assert_eq!(summaries[0].status, IngestStatus::Failed);
        assert!(summaries[0].error.as_deref().unwrap().contains("unreadable"));
        assert_eq!(summaries[1].status, IngestStatus::Complete);
        assert!(store.len().await > 0);
    }

    #[tokio::test]
    async fn folder_ingestion_requires_at_least_one_pdf() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new();
        let pipeline = pipeline(Some(lecture_extraction()), store);

        let result = pipeline.ingest_folder(dir.path()).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[test]
    fn document_ids_are_stable_per_path() {
        let path = Path::new("/lectures/week1.pdf");
        assert_eq!(document_id_for_path(path), document_id_for_path(path));
        assert_ne!(
            document_id_for_path(path),
            document_id_for_path(Path::new("/lectures/week2.pdf"))
        );
    }
}
