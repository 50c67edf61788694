use http::StatusCode;
use thiserror::Error;

/// Result type alias for doi-router operations
pub type Result<T, E = DoiRouterError> = std::result::Result<T, E>;

/// Errors that fail a whole batch request.
///
/// Per-identifier problems are not errors at this level; they are recorded as
/// [`crate::types::LookupFailure`] inside the batch result.
#[derive(Error, Debug)]
pub enum DoiRouterError {
    #[error("batch of {size} identifiers exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("identifier at position {index} is empty")]
    EmptyIdentifier { index: usize },

    #[error("identifier at position {index} contains a '.' or '..' path segment")]
    InvalidIdentifier { index: usize },

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(String),

    #[error("Failed to build response: {0}")]
    ResponseBuildError(String),

    #[error("worker pool needs at least one slot")]
    InvalidPoolSize,

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Invalid provider URL: {0}")]
    InvalidProviderUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DoiRouterError {
    /// HTTP status reported to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DoiRouterError::BatchTooLarge { .. }
            | DoiRouterError::EmptyIdentifier { .. }
            | DoiRouterError::InvalidIdentifier { .. }
            | DoiRouterError::RequestBodyError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short category reported as the `error` field of an error body.
    pub fn category(&self) -> &'static str {
        match self {
            DoiRouterError::BatchTooLarge { .. } => "batch too large",
            DoiRouterError::EmptyIdentifier { .. } => "empty identifier",
            DoiRouterError::InvalidIdentifier { .. } => "invalid identifier",
            DoiRouterError::RequestBodyError(_) => "invalid request",
            _ => "internal error",
        }
    }
}
