use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Capability boundary for the external embedding model. One vector per
/// input text, input order preserved.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

#[async_trait]
impl<M: EmbeddingModel + ?Sized> EmbeddingModel for Arc<M> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed(texts).await
    }
}

/// Deterministic character-trigram hashing embedder. Needs no provider and
/// keeps the whole pipeline runnable offline and in tests.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedding {
    pub dimensions: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dimensions = self.dimensions.max(1);
        let mut vector = vec![0f32; dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        if chars.len() < 3 {
            return vector;
        }

        for trigram in chars.windows(3) {
            let mut hash = 0xcbf29ce484222325u64;
            for ch in trigram {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(0x100000001b3);
                }
            }
            // signed contributions spread trigrams across both hemispheres
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vector[(hash >> 1) as usize % dimensions] += sign;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbedding {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Wraps a model with provider-batch splitting and the shared retry policy.
/// A transient failure retries the affected batch; a response with the wrong
/// cardinality or dimension is fatal.
pub struct BatchingEmbedder<M> {
    model: M,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<M: EmbeddingModel> BatchingEmbedder<M> {
    pub fn new(model: M, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.retry.run(|| self.model.embed(batch)).await?;

            if batch_vectors.len() != batch.len() {
                return Err(ProviderError::Fatal(format!(
                    "embedding model returned {} vectors for {} inputs",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            for vector in &batch_vectors {
                if vector.len() != self.model.dimensions() {
                    return Err(ProviderError::Fatal(format!(
                        "embedding dimension {} does not match configured {}",
                        vector.len(),
                        self.model.dimensions()
                    )));
                }
            }

            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Adapter for an OpenAI-shaped `/embeddings` endpoint.
#[derive(Clone)]
pub struct HttpEmbeddingModel {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl HttpEmbeddingModel {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        dimensions: usize,
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
            dimensions,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(ProviderError::from_request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("embedding", status, &body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Fatal(error.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
