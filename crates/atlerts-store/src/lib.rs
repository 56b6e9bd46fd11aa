//! # atlerts-store
//!
//! The contract the messaging engine needs from a remote real-time document
//! store: filtered and ordered queries, live subscriptions delivering an
//! initial snapshot followed by add/modify/remove deltas, and best-effort
//! writes including set-union updates and atomic batches.
//!
//! [`MemoryStore`] is an in-process implementation of that contract. It
//! evaluates live queries on every write and is what the engine's tests run
//! against.

pub mod document;
pub mod memory;
pub mod query;
pub mod store;
pub mod subscription;

mod error;

pub use document::{CollectionPath, Document, DocumentPath, FieldUpdate, Fields, Patch, UpdateOp};
pub use error::{Result, StoreError};
pub use memory::{MemoryStore, StoreStats, SubscriptionEvent};
pub use query::{Direction, Filter, FilterOp, OrderBy, Query, Target};
pub use store::DocumentStore;
pub use subscription::{
    Change, ChangeKind, SnapshotEvent, Subscription, SubscriptionHandle, SubscriptionId,
};
