use thiserror::Error;

use crate::models::EntityKind;

/// Failures of the document store or of a query plan.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures of the cache store. Callers treat these as soft.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the analytics service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed id / date range. Raised before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Database unreachable or failing; safe to retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
