//! # Replication Endpoints
//!
//! The operations a replication pass needs from either side, implemented
//! for registered local databases here and for remote CouchDB databases in
//! [`super::remote`].

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::{ReplicationError, ReplicationResult};
use crate::registry::DatabaseHandle;
use crate::store::{
    BulkResult, ChangesQuery, ChangesResponse, GetOptions, PutOptions, RevsDiffRequest,
    RevsDiffResponse,
};

/// Outcome of writing a batch to the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub failed: usize,
}

impl WriteOutcome {
    pub fn from_results(results: &[BulkResult]) -> Self {
        let written = results.iter().filter(|r| r.is_written()).count();
        Self {
            written,
            failed: results.len() - written,
        }
    }
}

/// One side of a replication
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Name or URL the endpoint was addressed by
    fn describe(&self) -> &str;

    async fn changes(&self, query: &ChangesQuery) -> ReplicationResult<ChangesResponse>;

    /// Block until a change after `query.since` exists
    async fn wait_for_change(&self, query: &ChangesQuery) -> ReplicationResult<()>;

    async fn revs_diff(&self, request: RevsDiffRequest) -> ReplicationResult<RevsDiffResponse>;

    /// Documents at the given revisions, with `_revisions` and inline attachments
    async fn fetch_revisions(&self, id: &str, revs: &[String]) -> ReplicationResult<Vec<Value>>;

    /// Store documents verbatim (`new_edits=false`)
    async fn write_replicated(&self, docs: Vec<Value>) -> ReplicationResult<WriteOutcome>;

    /// Checkpoint document body, if one was written earlier
    async fn read_checkpoint(&self, replication_id: &str) -> ReplicationResult<Option<Value>>;

    async fn write_checkpoint(&self, replication_id: &str, body: Value) -> ReplicationResult<()>;
}

pub(crate) fn checkpoint_id(replication_id: &str) -> String {
    format!("_local/{}", replication_id)
}

/// A database held by the registry
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    handle: DatabaseHandle,
}

impl LocalEndpoint {
    pub fn new(handle: DatabaseHandle) -> Self {
        Self { handle }
    }

    fn fail(&self, err: crate::store::StoreError) -> ReplicationError {
        ReplicationError::endpoint(self.handle.name(), err)
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn describe(&self) -> &str {
        self.handle.name()
    }

    async fn changes(&self, query: &ChangesQuery) -> ReplicationResult<ChangesResponse> {
        self.handle.changes(query).await.map_err(|e| self.fail(e))
    }

    async fn wait_for_change(&self, query: &ChangesQuery) -> ReplicationResult<()> {
        let live = ChangesQuery {
            live: true,
            limit: Some(1),
            ..query.clone()
        };
        let mut subscription = self.handle.subscribe(&live).await.map_err(|e| self.fail(e))?;
        match subscription.next().await {
            Some(Err(err)) => Err(self.fail(err)),
            _ => Ok(()),
        }
    }

    async fn revs_diff(&self, request: RevsDiffRequest) -> ReplicationResult<RevsDiffResponse> {
        self.handle.revs_diff(request).await.map_err(|e| self.fail(e))
    }

    async fn fetch_revisions(&self, id: &str, revs: &[String]) -> ReplicationResult<Vec<Value>> {
        let mut docs = Vec::with_capacity(revs.len());
        for rev in revs {
            let opts = GetOptions {
                rev: Some(rev.clone()),
                revs: true,
                attachments: true,
            };
            match self.handle.get(id, opts).await {
                Ok(doc) => docs.push(doc),
                // only winning revisions keep a body
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(self.fail(err)),
            }
        }
        Ok(docs)
    }

    async fn write_replicated(&self, docs: Vec<Value>) -> ReplicationResult<WriteOutcome> {
        let results = self
            .handle
            .bulk_docs(docs, PutOptions { new_edits: false })
            .await
            .map_err(|e| self.fail(e))?;
        Ok(WriteOutcome::from_results(&results))
    }

    async fn read_checkpoint(&self, replication_id: &str) -> ReplicationResult<Option<Value>> {
        match self.handle.get(&checkpoint_id(replication_id), GetOptions::default()).await {
            Ok(doc) => Ok(Some(doc)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn write_checkpoint(&self, replication_id: &str, body: Value) -> ReplicationResult<()> {
        let id = checkpoint_id(replication_id);
        let mut doc = json!({ "_id": id });
        if let Some(existing) = self.read_checkpoint(replication_id).await? {
            doc["_rev"] = existing["_rev"].clone();
        }
        if let (Some(target), Value::Object(fields)) = (doc.as_object_mut(), body) {
            target.extend(fields);
        }
        self.handle
            .put(doc, PutOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| self.fail(e))
    }
}
