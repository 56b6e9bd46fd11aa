use thiserror::Error;

/// Raised when a conversation id cannot be derived from the given identities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity is empty")]
    Empty,

    #[error("Identity {0:?} contains the conversation separator")]
    ContainsSeparator(String),

    #[error("Identity {0:?} contains a path separator")]
    ContainsPathSeparator(String),

    #[error("Cannot open a direct conversation with yourself ({0})")]
    SelfConversation(String),

    #[error("Conversation {conversation} does not include {user}")]
    NotAParticipant { conversation: String, user: String },
}
