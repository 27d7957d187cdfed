use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lecture_rag_core::{
    document_id_for_path, AnswerModel, CorpusStore, DisabledVision, EmbeddingModel, HashEmbedding,
    HttpAnswerModel, HttpEmbeddingModel, HttpVisionModel, IngestSummary, IngestionPipeline,
    LopdfExtractor, MemoryStore, PipelineConfig, QdrantStore, QueryPipeline, SearchFilter,
    VisionModel,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lecture-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL; omitted, chunks live in an in-memory store that only
    /// spans one invocation.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection name
    #[arg(long, default_value = "lecture_chunks")]
    qdrant_collection: String,

    /// OpenAI-shaped embeddings endpoint; omitted, the offline hashing
    /// embedder is used.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = "text-embedding-3-large")]
    embedding_model: String,

    /// Vision endpoint for figure descriptions; omitted, figures are
    /// ingested with placeholder descriptions.
    #[arg(long, env = "VISION_ENDPOINT")]
    vision_endpoint: Option<String>,

    /// Vision model name
    #[arg(long, default_value = "gpt-4o-mini")]
    vision_model: String,

    /// Answer-synthesis endpoint, required for `ask`
    #[arg(long, env = "LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    /// Answer model name
    #[arg(long, default_value = "gpt-4o-mini")]
    llm_model: String,

    /// Bearer token passed to every HTTP provider
    #[arg(long, env = "LECTURE_RAG_API_KEY")]
    api_key: Option<String>,

    /// Maximum chunk length in characters
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters of overlap between consecutive chunks
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Embedding vector dimension; fixed once a corpus exists
    #[arg(long, default_value = "128")]
    embedding_dimensions: usize,

    /// Per-call timeout for external providers, in seconds
    #[arg(long, default_value = "60")]
    provider_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one PDF file or a folder of PDFs into the corpus.
    Ingest {
        /// A .pdf file or a folder searched recursively.
        #[arg(long)]
        path: String,
    },
    /// Ask a question over the ingested corpus.
    Ask {
        #[arg(long)]
        question: String,
        /// Number of chunks to retrieve.
        #[arg(long, default_value = "4")]
        top_k: usize,
        /// Restrict retrieval to one document id.
        #[arg(long)]
        document: Option<String>,
        /// Only retrieve chunks that carry a figure.
        #[arg(long, default_value_t = false)]
        figures_only: bool,
    },
    /// Delete every chunk of one document, e.g. before re-ingesting it with
    /// a different embedding dimension.
    Delete {
        #[arg(long)]
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.provider_timeout_secs);

    let config = PipelineConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        embedding_dimensions: cli.embedding_dimensions,
        ..PipelineConfig::default()
    };

    let store: Arc<dyn CorpusStore> = match &cli.qdrant_url {
        Some(url) => {
            let store = QdrantStore::new(
                url.as_str(),
                cli.qdrant_collection.as_str(),
                cli.embedding_dimensions,
                timeout,
            )
            .context("invalid qdrant configuration")?;
            store
                .ensure_collection()
                .await
                .context("qdrant collection setup failed")?;
            Arc::new(store)
        }
        None => {
            warn!("no qdrant url configured, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let embedding: Arc<dyn EmbeddingModel> = match &cli.embedding_endpoint {
        Some(endpoint) => Arc::new(
            HttpEmbeddingModel::new(
                endpoint,
                &cli.embedding_model,
                cli.embedding_dimensions,
                cli.api_key.clone(),
                timeout,
            )
            .context("invalid embedding endpoint")?,
        ),
        None => Arc::new(HashEmbedding::new(cli.embedding_dimensions)),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "lecture-rag boot"
    );

    match cli.command {
        Command::Ingest { path } => {
            let vision: Arc<dyn VisionModel> = match &cli.vision_endpoint {
                Some(endpoint) => Arc::new(
                    HttpVisionModel::new(endpoint, &cli.vision_model, cli.api_key.clone(), timeout)
                        .context("invalid vision endpoint")?,
                ),
                None => {
                    warn!("no vision endpoint configured, figures degrade to placeholders");
                    Arc::new(DisabledVision)
                }
            };

            let pipeline =
                IngestionPipeline::new(LopdfExtractor, vision, embedding, store, config)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let target = Path::new(&path);
            let summaries: Vec<IngestSummary> = if target.is_dir() {
                pipeline
                    .ingest_folder(target)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?
            } else {
                let bytes = std::fs::read(target)
                    .with_context(|| format!("unable to read {}", target.display()))?;
                vec![pipeline.ingest(&document_id_for_path(target), &bytes).await]
            };

            for summary in &summaries {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
        }
        Command::Ask {
            question,
            top_k,
            document,
            figures_only,
        } => {
            let endpoint = cli
                .llm_endpoint
                .as_deref()
                .context("ask requires --llm-endpoint (or LLM_ENDPOINT)")?;
            let answer_model: Arc<dyn AnswerModel> = Arc::new(
                HttpAnswerModel::new(endpoint, &cli.llm_model, cli.api_key.clone(), timeout)
                    .context("invalid llm endpoint")?,
            );

            let pipeline = QueryPipeline::new(
                embedding,
                store,
                answer_model,
                PipelineConfig { top_k, ..config },
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let filter = SearchFilter {
                document_id: document,
                contains_image: figures_only.then_some(true),
            };

            let result = pipeline
                .ask(&question, &filter)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{}", result.answer);
            for citation in &result.cited_chunks {
                println!(
                    "  [source: {} pages {}-{} score={:.4} chunk={}]",
                    citation.document_id,
                    citation.page_start,
                    citation.page_end,
                    citation.score,
                    citation.chunk_id
                );
            }
        }
        Command::Delete { document_id } => {
            store
                .delete(&document_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("deleted chunks for document {document_id}");
        }
    }

    Ok(())
}
