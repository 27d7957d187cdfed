use crate::embedder::{BatchingEmbedder, EmbeddingModel};
use crate::error::{ProviderError, QueryError};
use crate::models::{AskResult, Citation, PipelineConfig, QueryStatus, SearchFilter, SearchHit};
use crate::retry::RetryPolicy;
use crate::store::CorpusStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Returned instead of invoking the language model when retrieval finds
/// nothing, so an empty corpus can never produce a hallucinated answer.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant course material was found to answer this question.";

/// Capability boundary for the answer-synthesis language model.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
impl<A: AnswerModel + ?Sized> AnswerModel for Arc<A> {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        (**self).complete(prompt).await
    }
}

/// Drives one question through query embedding, similarity search, context
/// assembly, and answer synthesis.
pub struct QueryPipeline<M, S, A> {
    embedder: BatchingEmbedder<M>,
    store: S,
    answer_model: A,
    retry: RetryPolicy,
    config: PipelineConfig,
}

impl<M, S, A> QueryPipeline<M, S, A>
where
    M: EmbeddingModel,
    S: CorpusStore,
    A: AnswerModel,
{
    pub fn new(
        embedding: M,
        store: S,
        answer_model: A,
        config: PipelineConfig,
    ) -> Result<Self, QueryError> {
        config
            .validate()
            .map_err(|error| QueryError::InvalidArgument(error.to_string()))?;
        let retry = RetryPolicy::new(config.retry_limit, config.backoff_base);
        Ok(Self {
            embedder: BatchingEmbedder::new(embedding, config.embed_batch_size, retry),
            store,
            answer_model,
            retry,
            config,
        })
    }

    pub async fn ask(
        &self,
        question: &str,
        filter: &SearchFilter,
    ) -> Result<AskResult, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidArgument("question is empty".to_string()));
        }

        let mut run = QueryRun::new(question);

        run.advance(QueryStatus::EmbeddingQuery);
        let vectors = self
            .embedder
            .embed_all(&[question.to_string()])
            .await
            .map_err(|error| run.fail(QueryError::Embedding(error.to_string())))?;

        run.advance(QueryStatus::Searching);
        let hits = self
            .store
            .search(&vectors[0], self.config.top_k, filter)
            .await
            .map_err(|error| run.fail(QueryError::Store(error)))?;

        if hits.is_empty() {
            run.complete();
            return Ok(AskResult {
                question: question.to_string(),
                answer: NO_CONTEXT_ANSWER.to_string(),
                cited_chunks: Vec::new(),
            });
        }

        run.advance(QueryStatus::AssemblingContext);
        let (context, citations) = assemble_context(&hits, self.config.context_char_budget);

        run.advance(QueryStatus::Synthesizing);
        let prompt = format!(
            "Answer the question based on the context below.\n\nContext:\n{context}\n\nQuestion: {question}"
        );
        let answer = self
            .retry
            .run(|| self.answer_model.complete(&prompt))
            .await
            .map_err(|error| run.fail(QueryError::Synthesis(error.to_string())))?;

        run.complete();
        Ok(AskResult {
            question: question.to_string(),
            answer: answer.trim().to_string(),
            cited_chunks: citations,
        })
    }
}

/// Concatenates hits in descending-score order, each tagged with its source
/// for citation, truncating to the character budget by dropping the
/// lowest-scoring chunks first. The best hit is always included.
pub fn assemble_context(hits: &[SearchHit], char_budget: usize) -> (String, Vec<Citation>) {
    let mut context = String::new();
    let mut citations = Vec::new();

    for hit in hits {
        let block = format!(
            "[source: {} pages {}-{}]\n{}",
            hit.document_id, hit.page_start, hit.page_end, hit.text
        );
        let separator = if context.is_empty() { 0 } else { 2 };
        if !context.is_empty()
            && context.chars().count() + separator + block.chars().count() > char_budget
        {
            break;
        }

        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&block);
        citations.push(Citation {
            chunk_id: hit.chunk_id.clone(),
            document_id: hit.document_id.clone(),
            page_start: hit.page_start,
            page_end: hit.page_end,
            score: hit.score,
        });
    }

    (context, citations)
}

struct QueryRun {
    status: QueryStatus,
}

impl QueryRun {
    fn new(question: &str) -> Self {
        tracing::info!(question, "query run started");
        Self {
            status: QueryStatus::Pending,
        }
    }

    fn advance(&mut self, next: QueryStatus) {
        tracing::debug!(from = self.status.as_str(), to = next.as_str(), "query transition");
        self.status = next;
    }

    fn complete(&mut self) {
        self.advance(QueryStatus::Complete);
    }

    fn fail(&mut self, error: QueryError) -> QueryError {
        tracing::error!(stage = self.status.as_str(), error = %error, "query run failed");
        self.advance(QueryStatus::Failed);
        error
    }
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct AnswerResponse {
    answer: Option<String>,
    text: Option<String>,
}

/// JSON-over-HTTP adapter for the answer-synthesis endpoint.
#[derive(Clone)]
pub struct HttpAnswerModel {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpAnswerModel {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|error| ProviderError::Fatal(error.to_string()))?,
            endpoint: Url::parse(endpoint)
                .map_err(|error| ProviderError::Fatal(error.to_string()))?,
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl AnswerModel for HttpAnswerModel {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = AnswerRequest {
            model: &self.model,
            prompt,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(ProviderError::from_request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("llm", status, &body));
        }

        let parsed: AnswerResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Fatal(error.to_string()))?;

        parsed
            .answer
            .or(parsed.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Fatal("llm response had no answer".to_string()))
    }
}
