//! Error types for sync operations.

use tabsync_model::EntityType;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No repository binding registered for the entity type.
    #[error("no binding registered for entity type \"{0}\"")]
    NoBinding(EntityType),

    /// Local repository error.
    #[error("repository error: {0}")]
    Repository(String),

    /// Remote service error.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Entity transform rejected a record.
    #[error("transform error: {0}")]
    Transform(String),

    /// State store error.
    #[error("state store error: {0}")]
    Storage(String),

    /// Persisted state failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A run for this entity type is already in progress.
    #[error("sync already in progress for entity type \"{0}\"")]
    RunInProgress(EntityType),

    /// Sync was cancelled between batches.
    #[error("sync cancelled")]
    Cancelled,

    /// Unknown schedule frequency name.
    #[error("unknown schedule frequency: {0}")]
    UnknownFrequency(String),
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::Storage(_) => true,
            _ => false,
        }
    }
}
