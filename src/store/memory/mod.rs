//! # In-Memory Store
//!
//! Reference engine behind the [`DocumentStore`] and [`Database`] traits.
//! Every database is a [`table::DocTable`] under a lock plus a broadcast
//! channel of committed changes. Commits are published while the write
//! lock is held, so subscribers observe them in sequence order.

mod filter;
mod table;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use self::filter::ChangeFilter;
use self::table::{Commit, DocTable};
use super::errors::{StoreError, StoreResult};
use super::subscription::{ChangeSender, ChangeSubscription};
use super::types::{
    AllDocsOptions, AllDocsResponse, AttachmentData, BulkResult, ChangeEvent, ChangesQuery,
    ChangesResponse, DbInfo, GetOptions, PutOptions, RevsDiffRequest, RevsDiffResponse,
    WriteResult,
};
use super::{Database, DocumentStore};

/// Commits buffered per database before slow subscribers lag
const NOTICE_CAPACITY: usize = 1024;

/// Events buffered between a live producer and its subscriber
const LIVE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
enum Notice {
    Commit(Commit),
    Destroyed,
}

#[derive(Debug)]
struct SharedDb {
    table: RwLock<DocTable>,
    notices: broadcast::Sender<Notice>,
}

impl SharedDb {
    fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            table: RwLock::new(DocTable::default()),
            notices,
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, DocTable>> {
        self.table
            .read()
            .map_err(|_| StoreError::internal("Lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, DocTable>> {
        self.table
            .write()
            .map_err(|_| StoreError::internal("Lock poisoned"))
    }

    fn publish(&self, commit: Commit) {
        // no receivers is fine
        let _ = self.notices.send(Notice::Commit(commit));
    }
}

/// In-memory catalog of databases
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<HashMap<String, Arc<SharedDb>>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `open` was called for a name
    pub fn open_count(&self, name: &str) -> usize {
        self.opens
            .lock()
            .ok()
            .and_then(|opens| opens.get(name).copied())
            .unwrap_or(0)
    }

    /// Number of live change subscriptions attached to a database
    pub fn live_subscribers(&self, name: &str) -> usize {
        self.catalog
            .read()
            .ok()
            .and_then(|catalog| catalog.get(name).map(|db| db.notices.receiver_count()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn all_dbs(&self) -> StoreResult<Vec<String>> {
        let catalog = self
            .catalog
            .read()
            .map_err(|_| StoreError::internal("Lock poisoned"))?;
        let mut names: Vec<String> = catalog.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        *self
            .opens
            .lock()
            .map_err(|_| StoreError::internal("Lock poisoned"))?
            .entry(name.to_string())
            .or_default() += 1;

        let mut catalog = self
            .catalog
            .write()
            .map_err(|_| StoreError::internal("Lock poisoned"))?;
        let shared = catalog
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(db = name, "creating in-memory database");
                Arc::new(SharedDb::new())
            })
            .clone();
        Ok(Arc::new(MemoryDatabase {
            name: name.to_string(),
            shared,
        }))
    }

    async fn destroy(&self, name: &str) -> StoreResult<()> {
        let removed = self
            .catalog
            .write()
            .map_err(|_| StoreError::internal("Lock poisoned"))?
            .remove(name);
        match removed {
            Some(shared) => {
                let _ = shared.notices.send(Notice::Destroyed);
                Ok(())
            }
            None => Err(StoreError::not_found("missing")),
        }
    }
}

/// Handle to one in-memory database
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    shared: Arc<SharedDb>,
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> StoreResult<DbInfo> {
        Ok(self.shared.read()?.info(&self.name))
    }

    async fn put(&self, doc: Value, opts: PutOptions) -> StoreResult<WriteResult> {
        let mut table = self.shared.write()?;
        let (result, commit) = table.write(doc, &opts)?;
        if let Some(commit) = commit {
            self.shared.publish(commit);
        }
        Ok(result)
    }

    async fn get(&self, id: &str, opts: GetOptions) -> StoreResult<Value> {
        self.shared.read()?.get(id, &opts)
    }

    async fn remove(&self, id: &str, rev: &str) -> StoreResult<WriteResult> {
        let tombstone = json!({ "_id": id, "_rev": rev, "_deleted": true });
        self.put(tombstone, PutOptions::default()).await
    }

    async fn bulk_docs(&self, docs: Vec<Value>, opts: PutOptions) -> StoreResult<Vec<BulkResult>> {
        let mut table = self.shared.write()?;
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match table.write(doc, &opts) {
                Ok((written, commit)) => {
                    if let Some(commit) = commit {
                        self.shared.publish(commit);
                    }
                    results.push(BulkResult::Written(written));
                }
                Err(err) => results.push(BulkResult::Failed {
                    id,
                    error: err.error,
                    reason: err.reason,
                }),
            }
        }
        Ok(results)
    }

    async fn all_docs(&self, opts: AllDocsOptions) -> StoreResult<AllDocsResponse> {
        Ok(self.shared.read()?.all_docs(&opts))
    }

    async fn changes(&self, query: &ChangesQuery) -> StoreResult<ChangesResponse> {
        let filter = ChangeFilter::from_query(query)?;
        self.shared.read()?.changes(query, &filter)
    }

    async fn subscribe(&self, query: &ChangesQuery) -> StoreResult<ChangeSubscription> {
        let filter = ChangeFilter::from_query(query)?;
        // subscribe before the snapshot so no commit falls in between
        let mut notices = self.shared.notices.subscribe();
        let (backlog, after) = {
            let table = self.shared.read()?;
            let after = table.resolve_since(&query.since)?;
            (table.events_after(after, &filter, query.include_docs), after)
        };

        let (tx, rx) = ChangeSubscription::channel(LIVE_BUFFER);
        let mut forwarder = Forwarder {
            tx,
            filter,
            include_docs: query.include_docs,
            last_seq: after,
            remaining: query.limit,
        };
        let shared = Arc::clone(&self.shared);
        let db = self.name.clone();

        let producer = tokio::spawn(async move {
            if forwarder.remaining == Some(0) || !forwarder.forward_all(backlog).await {
                return;
            }
            loop {
                let notice = tokio::select! {
                    _ = forwarder.tx.closed() => return,
                    notice = notices.recv() => notice,
                };
                match notice {
                    Ok(Notice::Commit(commit)) => {
                        if !forwarder.forward(commit.seq, commit.event).await {
                            return;
                        }
                    }
                    Ok(Notice::Destroyed) | Err(RecvError::Closed) => {
                        let _ = forwarder
                            .tx
                            .send(Err(StoreError::not_found("Database deleted")))
                            .await;
                        return;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(db = %db, skipped, "Live subscriber lagged, replaying from table");
                        // the guard must be gone before the next await
                        let snapshot = shared.read().map(|table| {
                            table.events_after(
                                forwarder.last_seq,
                                &forwarder.filter,
                                forwarder.include_docs,
                            )
                        });
                        let missed = match snapshot {
                            Ok(missed) => missed,
                            Err(err) => {
                                let _ = forwarder.tx.send(Err(err)).await;
                                return;
                            }
                        };
                        if !forwarder.forward_all(missed).await {
                            return;
                        }
                    }
                }
            }
        });

        Ok(ChangeSubscription::new(rx, producer))
    }

    async fn revs_diff(&self, request: RevsDiffRequest) -> StoreResult<RevsDiffResponse> {
        Ok(self.shared.read()?.revs_diff(request))
    }

    async fn compact(&self) -> StoreResult<()> {
        // nothing to reclaim: only winning revisions are kept
        debug!(db = %self.name, "compaction requested");
        Ok(())
    }

    async fn put_attachment(
        &self,
        id: &str,
        name: &str,
        rev: Option<&str>,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<WriteResult> {
        let mut table = self.shared.write()?;
        let (result, commit) = table.put_attachment(id, name, rev, data, content_type)?;
        self.shared.publish(commit);
        Ok(result)
    }

    async fn get_attachment(&self, id: &str, name: &str) -> StoreResult<AttachmentData> {
        self.shared.read()?.get_attachment(id, name)
    }

    async fn remove_attachment(&self, id: &str, name: &str, rev: &str) -> StoreResult<WriteResult> {
        let mut table = self.shared.write()?;
        let (result, commit) = table.remove_attachment(id, name, rev)?;
        self.shared.publish(commit);
        Ok(result)
    }
}

/// Producer-side state of one live subscription
struct Forwarder {
    tx: ChangeSender,
    filter: ChangeFilter,
    include_docs: bool,
    last_seq: u64,
    remaining: Option<usize>,
}

impl Forwarder {
    /// Returns false once the subscriber is gone or the limit is reached
    async fn forward(&mut self, seq: u64, mut event: ChangeEvent) -> bool {
        if seq <= self.last_seq {
            return true;
        }
        self.last_seq = seq;
        if !self.filter.matches(&event.id) {
            return true;
        }
        if !self.include_docs {
            event.doc = None;
        }
        if self.tx.send(Ok(event)).await.is_err() {
            return false;
        }
        match self.remaining.as_mut() {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left > 0
            }
            None => true,
        }
    }

    async fn forward_all(&mut self, events: Vec<(u64, ChangeEvent)>) -> bool {
        for (seq, event) in events {
            if !self.forward(seq, event).await {
                return false;
            }
        }
        true
    }
}
