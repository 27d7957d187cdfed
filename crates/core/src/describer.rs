use crate::error::ProviderError;
use crate::models::{Span, SpanPayload};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Capability boundary for the external vision model. Implementations must
/// be stateless so descriptions can be requested concurrently.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
impl<V: VisionModel + ?Sized> VisionModel for Arc<V> {
    async fn describe(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        (**self).describe(image, prompt).await
    }
}

/// Text surrounding an image in reading order, bounded so the context never
/// starves the description request itself.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub before: String,
    pub after: String,
}

impl ContextWindow {
    pub fn excerpt(&self) -> String {
        if self.before.is_empty() || self.after.is_empty() {
            format!("{}{}", self.before, self.after)
        } else {
            format!("{} … {}", self.before, self.after)
        }
    }
}

/// Collects up to `budget` characters of text around the span at `position`,
/// split evenly between the preceding and following text spans.
pub fn context_window(spans: &[Span], position: usize, budget: usize) -> ContextWindow {
    let half = (budget / 2).max(1);

    let mut before = String::new();
    for span in spans[..position].iter().rev() {
        if let SpanPayload::Text(text) = &span.payload {
            if before.is_empty() {
                before = text.clone();
            } else {
                before = format!("{text}\n{before}");
            }
            if before.chars().count() >= half {
                break;
            }
        }
    }
    let before: String = tail_chars(&before, half);

    let mut after = String::new();
    for span in spans.iter().skip(position + 1) {
        if let SpanPayload::Text(text) = &span.payload {
            if !after.is_empty() {
                after.push('\n');
            }
            after.push_str(text);
            if after.chars().count() >= half {
                break;
            }
        }
    }
    let after: String = after.chars().take(half).collect();

    ContextWindow { before, after }
}

fn tail_chars(text: &str, count: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(count);
    chars[start..].iter().collect()
}

#[derive(Debug, Clone)]
pub enum DescriptionOutcome {
    Described(String),
    Failed(String),
}

/// Owns context windowing and the bounded retry policy around the vision
/// model. Exhausted retries come back as a sentinel failure so the caller
/// can degrade to a placeholder instead of aborting the run.
pub struct ImageDescriber<V> {
    model: V,
    retry: RetryPolicy,
}

impl<V: VisionModel> ImageDescriber<V> {
    pub fn new(model: V, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn describe(&self, image: &[u8], window: &ContextWindow) -> DescriptionOutcome {
        let prompt = build_prompt(window);
        match self.retry.run(|| self.model.describe(image, &prompt)).await {
            Ok(description) => DescriptionOutcome::Described(description.trim().to_string()),
            Err(error) => {
                tracing::warn!(error = %error, "image description failed, degrading to placeholder");
                DescriptionOutcome::Failed(error.to_string())
            }
        }
    }
}

fn build_prompt(window: &ContextWindow) -> String {
    let mut prompt = String::from(
        "Describe this figure from a lecture document so the description can \
         stand in for the image in a searchable text corpus.",
    );
    if !window.before.is_empty() {
        prompt.push_str("\n\nText before the figure:\n");
        prompt.push_str(&window.before);
    }
    if !window.after.is_empty() {
        prompt.push_str("\n\nText after the figure:\n");
        prompt.push_str(&window.after);
    }
    prompt
}

/// Stand-in used when no vision endpoint is configured; every image degrades
/// to a counted placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVision;

#[async_trait]
impl VisionModel for DisabledVision {
    async fn describe(&self, _image: &[u8], _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal("no vision model configured".to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    image_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VisionResponse {
    description: Option<String>,
    text: Option<String>,
}

/// JSON-over-HTTP adapter for a vision endpoint.
#[derive(Clone)]
pub struct HttpVisionModel {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpVisionModel {
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
impl VisionModel for HttpVisionModel {
    async fn describe(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        let payload = VisionRequest {
            model: &self.model,
            prompt,
            image_base64: STANDARD.encode(image),
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(ProviderError::from_request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("vision", status, &body));
        }

        let parsed: VisionResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Fatal(error.to_string()))?;

        parsed
            .description
            .or(parsed.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Fatal("vision response had no description".to_string()))
    }
}
