use serde::Serialize;
use thiserror::Error;

/// Result type for review engine operations.
pub type ReviewResult<T> = Result<T, ReviewError>;

/// Failure taxonomy surfaced by the review engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("review '{0}' not found")]
    NotFound(String),
    #[error("invalid review request: {0}")]
    Validation(String),
    #[error("messaging gateway failure: {0}")]
    TransientGateway(String),
    #[error("review store failure: {0}")]
    TransientStore(String),
}

/// Coarse classification of a [`ReviewError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    TransientGateway,
    TransientStore,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::TransientGateway => "transient_gateway",
            Self::TransientStore => "transient_store",
        }
    }
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientGateway(_) => ErrorKind::TransientGateway,
            Self::TransientStore(_) => ErrorKind::TransientStore,
        }
    }

    /// Returns true when a later attempt may succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientGateway | ErrorKind::TransientStore
        )
    }
}
