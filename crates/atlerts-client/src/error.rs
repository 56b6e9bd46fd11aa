use atlerts_shared::IdentityError;
use atlerts_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the messaging engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The store could not be reached. Safe to retry.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// An update targeted a document that no longer exists.
    #[error("Stale write: {0}")]
    StaleWrite(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Malformed document {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Message has neither text nor attachment")]
    EmptyMessage,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TransientIo(reason) => Self::TransientIo(reason),
            StoreError::NotFound(path) => Self::StaleWrite(path),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Content of a message that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachment_url: Option<String>,
}

impl Draft {
    pub fn new(text: impl Into<String>, attachment_url: Option<String>) -> Self {
        Self {
            text: text.into(),
            attachment_url,
        }
    }

    /// Nothing to send: whitespace-only text and no attachment.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.attachment_url.is_none()
    }
}

/// A send that did not reach the store. The draft is handed back so the UI
/// can offer a retry without losing what was typed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to send message: {error}")]
pub struct SendFailure {
    pub draft: Draft,
    #[source]
    pub error: ClientError,
}

impl SendFailure {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}
