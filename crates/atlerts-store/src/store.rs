use async_trait::async_trait;

use crate::document::{CollectionPath, Document, DocumentPath, Fields, Patch, UpdateOp};
use crate::error::Result;
use crate::query::Query;
use crate::subscription::Subscription;

/// Minimum surface the messaging engine needs from a document store.
///
/// Writes are best-effort and eventually consistent: a successful write is
/// reflected in every matching live subscription, but no ordering is
/// promised across subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of a query's current results.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Fetch documents of one collection by id. Missing ids are skipped;
    /// the order of `ids` is kept.
    async fn get_all(&self, collection: &CollectionPath, ids: &[String]) -> Result<Vec<Document>>;

    /// Open a live query.
    async fn subscribe(&self, query: Query) -> Result<Subscription>;

    /// Create a document with a store-assigned id and return that id.
    async fn write(&self, collection: &CollectionPath, fields: Fields) -> Result<String>;

    /// Partially update an existing document.
    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound) when
    /// it does not exist.
    async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()>;

    /// Apply every update or none of them.
    async fn batch_update(&self, ops: Vec<UpdateOp>) -> Result<()>;
}
