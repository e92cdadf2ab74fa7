//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use crate::domain::entities::EntityKind;
use thiserror::Error;

/// Outcome classes every store adapter must distinguish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Transient: connection refused, 5xx, lock contention.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
}

impl StoreError {
    /// Retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Malformed {kind} document: {reason}")]
    Decode { kind: EntityKind, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("UI error: {message}")]
    Ui { message: String, cancelled: bool },
}

impl DomainError {
    /// True for errors caused by operator input rather than infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::Validation(_)
                | DomainError::UnknownRelation(_)
                | DomainError::Store(StoreError::Validation(_))
        )
    }
}
