use thiserror::Error;

/// Errors produced by a document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached. Safe to retry.
    #[error("Store unavailable: {0}")]
    TransientIo(String),

    /// An update targeted a document that no longer exists.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A path does not have the collection/document shape expected.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A document body could not be converted to or from a model.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Connectivity failures are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }

    /// The write no longer applies to anything in the store.
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
