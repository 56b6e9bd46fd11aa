//! # atlerts-shared
//!
//! Identities, conversation id derivation and the document models shared by
//! the store contract and the messaging engine.

pub mod constants;
pub mod error;
pub mod identity;
pub mod models;
pub mod types;

pub use error::IdentityError;
pub use identity::{counterpart, resolve_conversation_id};
pub use models::{BroadcastMessage, BroadcastReply, Message, UserProfile};
pub use types::{BroadcastId, ConversationId, MessageId, UserIdentity};
