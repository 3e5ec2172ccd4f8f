//! # Document Store
//!
//! The storage engine behind the gateway, seen as an opaque capability.
//!
//! - [`DocumentStore`]: the catalog (`all_dbs`, `open`, `destroy`)
//! - [`Database`]: per-database CRUD, bulk writes, revision diffing,
//!   attachments and the change source
//! - [`ChangeSubscription`]: a live, cancellable change stream
//! - [`MemoryStore`]: an in-memory engine used by the binary and tests

pub mod errors;
pub mod memory;
pub mod subscription;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use subscription::{ChangeSender, ChangeSubscription};
pub use types::{
    AllDocsOptions, AllDocsResponse, AllDocsRow, AttachmentData, BulkResult, ChangeEvent,
    ChangesQuery, ChangesResponse, DbInfo, GetOptions, PutOptions, RevisionRef, RevsDiffEntry,
    RevsDiffRequest, RevsDiffResponse, RowValue, Since, WriteResult,
};

/// Catalog of databases held by an engine
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every database the engine knows, opened or not
    async fn all_dbs(&self) -> StoreResult<Vec<String>>;

    /// Open a database, creating it when absent
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Database>>;

    /// Delete all persisted state of a database
    async fn destroy(&self, name: &str) -> StoreResult<()>;
}

/// One open database
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    async fn info(&self) -> StoreResult<DbInfo>;

    /// Create or update a document; `doc` must be a JSON object with `_id`
    async fn put(&self, doc: Value, opts: PutOptions) -> StoreResult<WriteResult>;

    async fn get(&self, id: &str, opts: GetOptions) -> StoreResult<Value>;

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteResult>;

    async fn bulk_docs(&self, docs: Vec<Value>, opts: PutOptions) -> StoreResult<Vec<BulkResult>>;

    async fn all_docs(&self, opts: AllDocsOptions) -> StoreResult<AllDocsResponse>;

    /// Non-live changes query
    async fn changes(&self, query: &ChangesQuery) -> StoreResult<ChangesResponse>;

    /// Live changes subscription
    async fn subscribe(&self, query: &ChangesQuery) -> StoreResult<ChangeSubscription>;

    async fn revs_diff(&self, request: RevsDiffRequest) -> StoreResult<RevsDiffResponse>;

    async fn compact(&self) -> StoreResult<()>;

    async fn put_attachment(
        &self,
        id: &str,
        name: &str,
        rev: Option<&str>,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<WriteResult>;

    async fn get_attachment(&self, id: &str, name: &str) -> StoreResult<AttachmentData>;

    async fn remove_attachment(&self, id: &str, name: &str, rev: &str) -> StoreResult<WriteResult>;

    /// Hook run once when the registry first registers the database
    async fn install_validation(&self) -> StoreResult<()> {
        Ok(())
    }
}
