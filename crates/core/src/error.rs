use reqwest::StatusCode;
use thiserror::Error;

/// Classification every external provider call resolves to before an
/// orchestrator decides to retry, degrade, or fail the run.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn from_request(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() || error.is_connect() {
            ProviderError::Transient(message)
        } else {
            ProviderError::Fatal(message)
        }
    }

    pub fn from_status(backend: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{backend} returned {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ProviderError::Transient(message)
        } else {
            ProviderError::Fatal(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("corpus store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("query embedding failed: {0}")]
    Embedding(String),

    #[error("corpus store failed: {0}")]
    Store(#[from] StoreError),

    #[error("answer synthesis failed: {0}")]
    Synthesis(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
