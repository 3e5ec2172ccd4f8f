//! # Replicator
//!
//! Runs `_replicate` requests. A one-shot replication runs a single pass
//! and records a history entry for every local endpoint. A continuous one
//! is acknowledged right away and keeps running as a background task until
//! cancelled, or until one of its local databases is destroyed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::endpoint::{Endpoint, LocalEndpoint};
use super::errors::{ReplicationError, ReplicationResult};
use super::history::{HistoryEntry, HistoryLog};
use super::remote::RemoteEndpoint;
use crate::registry::{DatabaseRegistry, RegistryError};
use crate::store::{ChangesQuery, RevsDiffRequest, Since};

/// Changes read per batch
const BATCH_SIZE: usize = 100;

/// Pause before a continuous task retries a failed pass
const RETRY_DELAY: Duration = Duration::from_secs(5);

static REMOTE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// True for `http://` and `https://` endpoints
pub fn is_remote(endpoint: &str) -> bool {
    REMOTE
        .get_or_init(|| Regex::new(r"^https?://"))
        .as_ref()
        .map(|re| re.is_match(endpoint))
        .unwrap_or(false)
}

/// Body of `POST /_replicate`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplicationRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default)]
    pub create_target: bool,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub query_params: Map<String, Value>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
}

impl ReplicationRequest {
    fn validate(&self) -> ReplicationResult<()> {
        if self.source.is_empty() || self.target.is_empty() {
            return Err(ReplicationError::InvalidRequest(
                "source and target are required".into(),
            ));
        }
        Ok(())
    }

    /// Stable id of the source/target/filter combination
    pub fn replication_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.target.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.filter.as_deref().unwrap_or("").as_bytes());
        hasher.update(Value::Object(self.query_params.clone()).to_string().as_bytes());
        if let Some(ids) = &self.doc_ids {
            hasher.update(ids.join("\n").as_bytes());
        }
        let digest: String = hasher.finalize()[..16]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        if self.continuous {
            format!("{}+continuous", digest)
        } else {
            digest
        }
    }

    /// Changes query template for reading the source
    fn source_query(&self) -> ChangesQuery {
        let mut query = ChangesQuery {
            filter: self.filter.clone(),
            query_params: self.query_params.clone(),
            ..Default::default()
        };
        if let Some(ids) = &self.doc_ids {
            query.filter = Some("_doc_ids".into());
            query.query_params.insert("doc_ids".into(), json!(ids));
        }
        query
    }
}

/// Result of one completed replication
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub ok: bool,
    pub session_id: String,
    pub source_last_seq: Value,
    pub docs_read: usize,
    pub docs_written: usize,
    pub doc_write_failures: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
}

/// Reply to a `_replicate` request
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReplicateReply {
    Completed(ReplicationReport),
    Acknowledged {
        ok: bool,
        #[serde(rename = "_local_id")]
        local_id: String,
    },
}

/// Entry of `/_active_tasks`
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub replication_id: String,
    pub source: String,
    pub target: String,
    pub continuous: bool,
    pub started_on: i64,
    pub updated_on: i64,
    pub docs_read: usize,
    pub docs_written: usize,
    pub doc_write_failures: usize,
    pub checkpointed_source_seq: Value,
}

struct ActiveTask {
    info: Arc<Mutex<TaskInfo>>,
    handle: JoinHandle<()>,
}

type TaskTable = Arc<Mutex<HashMap<String, ActiveTask>>>;

/// Counters of one replication pass
#[derive(Debug, Clone, Default)]
struct PassStats {
    start_last_seq: Value,
    end_last_seq: Value,
    missing_checked: usize,
    missing_found: usize,
    docs_read: usize,
    docs_written: usize,
    doc_write_failures: usize,
}

/// Copy everything after `since` from `source` to `target`
async fn run_pass(
    source: &dyn Endpoint,
    target: &dyn Endpoint,
    template: &ChangesQuery,
    since: Since,
) -> ReplicationResult<PassStats> {
    let mut stats = PassStats {
        start_last_seq: Value::String(since.to_query_value()),
        ..Default::default()
    };
    let mut since = since;

    loop {
        let query = ChangesQuery {
            since: since.clone(),
            limit: Some(BATCH_SIZE),
            ..template.clone()
        };
        let batch = source.changes(&query).await?;
        let batch_len = batch.results.len();

        let mut request = RevsDiffRequest::new();
        for change in &batch.results {
            stats.missing_checked += change.changes.len();
            request
                .entry(change.id.clone())
                .or_default()
                .extend(change.changes.iter().map(|c| c.rev.clone()));
        }

        if !request.is_empty() {
            let diff = target.revs_diff(request).await?;
            let mut docs = Vec::new();
            for (id, entry) in diff {
                stats.missing_found += entry.missing.len();
                docs.extend(source.fetch_revisions(&id, &entry.missing).await?);
            }
            stats.docs_read += docs.len();
            if !docs.is_empty() {
                let outcome = target.write_replicated(docs).await?;
                stats.docs_written += outcome.written;
                stats.doc_write_failures += outcome.failed;
            }
        }

        stats.end_last_seq = batch.last_seq.clone();
        since = Since::from_seq(&batch.last_seq);
        if batch_len < BATCH_SIZE {
            return Ok(stats);
        }
    }
}

/// Where a replication resumes: the target checkpoint, else the start
async fn resume_point(target: &dyn Endpoint, replication_id: &str) -> Since {
    match target.read_checkpoint(replication_id).await {
        Ok(Some(doc)) => doc
            .get("source_last_seq")
            .map(Since::from_seq)
            .unwrap_or_default(),
        Ok(None) => Since::Start,
        Err(err) => {
            warn!(replication_id, error = %err, "Ignoring unreadable checkpoint");
            Since::Start
        }
    }
}

async fn checkpoint(target: &dyn Endpoint, replication_id: &str, session_id: &str, seq: &Value) {
    let body = json!({ "session_id": session_id, "source_last_seq": seq });
    if let Err(err) = target.write_checkpoint(replication_id, body).await {
        warn!(replication_id, error = %err, "Failed to write checkpoint");
    }
}

/// Runs replications and tracks continuous ones
pub struct Replicator {
    registry: Arc<DatabaseRegistry>,
    history: Arc<HistoryLog>,
    tasks: TaskTable,
    client: reqwest::Client,
}

impl Replicator {
    pub fn new(registry: Arc<DatabaseRegistry>) -> Self {
        Self {
            registry,
            history: Arc::new(HistoryLog::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            client: reqwest::Client::new(),
        }
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    fn tasks(&self) -> ReplicationResult<MutexGuard<'_, HashMap<String, ActiveTask>>> {
        self.tasks
            .lock()
            .map_err(|_| ReplicationError::Internal("Lock poisoned".into()))
    }

    /// Handle a `_replicate` request
    pub async fn replicate(&self, request: ReplicationRequest) -> ReplicationResult<ReplicateReply> {
        request.validate()?;
        let replication_id = request.replication_id();

        if request.cancel {
            return self.cancel(&replication_id);
        }

        // watch before resolving so a destroy in between is not missed
        let destroyed = request.continuous.then(|| self.registry.watch_destroyed());
        let source = self.endpoint(&request.source, false).await?;
        let target = self.endpoint(&request.target, request.create_target).await?;

        if let Some(destroyed) = destroyed {
            self.spawn_continuous(&request, &replication_id, source, target, destroyed)?;
            return Ok(ReplicateReply::Acknowledged {
                ok: true,
                local_id: replication_id,
            });
        }

        let report = self
            .run_once(&request, &replication_id, source.as_ref(), target.as_ref())
            .await?;
        Ok(ReplicateReply::Completed(report))
    }

    async fn run_once(
        &self,
        request: &ReplicationRequest,
        replication_id: &str,
        source: &dyn Endpoint,
        target: &dyn Endpoint,
    ) -> ReplicationResult<ReplicationReport> {
        let session_id = Uuid::new_v4().simple().to_string();
        let start_time = Utc::now();
        info!(source = %request.source, target = %request.target, session_id = %session_id, "Replication started");

        let since = resume_point(target, replication_id).await;
        let stats = run_pass(source, target, &request.source_query(), since)
            .await
            .map_err(|err| {
                warn!(source = %request.source, target = %request.target, error = %err, "Replication failed");
                err
            })?;
        checkpoint(target, replication_id, &session_id, &stats.end_last_seq).await;
        let end_time = Utc::now();

        let entry = HistoryEntry {
            session_id: session_id.clone(),
            start_time,
            end_time,
            start_last_seq: stats.start_last_seq.clone(),
            end_last_seq: stats.end_last_seq.clone(),
            recorded_seq: stats.end_last_seq.clone(),
            missing_checked: stats.missing_checked,
            missing_found: stats.missing_found,
            docs_read: stats.docs_read,
            docs_written: stats.docs_written,
            doc_write_failures: stats.doc_write_failures,
            status: "completed".into(),
        };
        let mut keys = vec![request.source.as_str()];
        if request.target != request.source {
            keys.push(request.target.as_str());
        }
        keys.retain(|key| !is_remote(key));
        for key in &keys {
            self.history.record(key, entry.clone())?;
        }

        let mut history = Vec::new();
        for key in &keys {
            history = self.history.history(key)?;
            if !history.is_empty() {
                break;
            }
        }

        info!(
            source = %request.source,
            target = %request.target,
            docs_written = stats.docs_written,
            "Replication finished"
        );
        Ok(ReplicationReport {
            ok: true,
            session_id,
            source_last_seq: stats.end_last_seq,
            docs_read: stats.docs_read,
            docs_written: stats.docs_written,
            doc_write_failures: stats.doc_write_failures,
            start_time,
            end_time,
            history,
        })
    }

    /// Resolve a name or URL into an endpoint
    async fn endpoint(&self, name: &str, create: bool) -> ReplicationResult<Arc<dyn Endpoint>> {
        if is_remote(name) {
            let remote = RemoteEndpoint::new(self.client.clone(), name)?;
            if create {
                remote.ensure_exists().await?;
            }
            return Ok(Arc::new(remote));
        }

        let handle = match self.registry.resolve(name).await {
            Ok(handle) => handle,
            Err(RegistryError::NotFound(_)) if create => self
                .registry
                .create(name)
                .await
                .map_err(|e| ReplicationError::from_registry(name, e))?,
            Err(err) => return Err(ReplicationError::from_registry(name, err)),
        };
        Ok(Arc::new(LocalEndpoint::new(handle)))
    }

    fn spawn_continuous(
        &self,
        request: &ReplicationRequest,
        replication_id: &str,
        source: Arc<dyn Endpoint>,
        target: Arc<dyn Endpoint>,
        destroyed: broadcast::Receiver<String>,
    ) -> ReplicationResult<()> {
        let mut tasks = self.tasks()?;
        if tasks.contains_key(replication_id) {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let info = Arc::new(Mutex::new(TaskInfo {
            kind: "replication".into(),
            replication_id: replication_id.to_string(),
            source: request.source.clone(),
            target: request.target.clone(),
            continuous: true,
            started_on: now,
            updated_on: now,
            docs_read: 0,
            docs_written: 0,
            doc_write_failures: 0,
            checkpointed_source_seq: json!(0),
        }));

        let local_names = [&request.source, &request.target]
            .into_iter()
            .filter(|name| !is_remote(name))
            .cloned()
            .collect();
        let handle = tokio::spawn(supervise(
            ContinuousJob {
                replication_id: replication_id.to_string(),
                template: request.source_query(),
                source,
                target,
                local_names,
                info: Arc::clone(&info),
            },
            destroyed,
            Arc::clone(&self.tasks),
        ));
        tasks.insert(replication_id.to_string(), ActiveTask { info, handle });
        info!(replication_id, source = %request.source, target = %request.target, "Continuous replication started");
        Ok(())
    }

    /// Stop a continuous replication
    pub fn cancel(&self, replication_id: &str) -> ReplicationResult<ReplicateReply> {
        // cancel requests carry `continuous: true` or not; accept either id
        let base = replication_id.trim_end_matches("+continuous");
        let continuous_id = format!("{}+continuous", base);
        let removed = {
            let mut tasks = self.tasks()?;
            tasks.remove(&continuous_id).or_else(|| tasks.remove(base))
        };
        match removed {
            Some(task) => {
                task.handle.abort();
                info!(replication_id = %continuous_id, "Continuous replication cancelled");
                Ok(ReplicateReply::Acknowledged {
                    ok: true,
                    local_id: continuous_id,
                })
            }
            None => Err(ReplicationError::TaskNotFound(continuous_id)),
        }
    }

    /// Running continuous replications
    pub fn active_tasks(&self) -> ReplicationResult<Vec<TaskInfo>> {
        let tasks = self.tasks()?;
        let mut infos: Vec<TaskInfo> = tasks
            .values()
            .filter_map(|task| task.info.lock().ok().map(|info| info.clone()))
            .collect();
        infos.sort_by(|a, b| a.replication_id.cmp(&b.replication_id));
        Ok(infos)
    }

    /// Abort every background task
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, task) in tasks.drain() {
                task.handle.abort();
            }
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ContinuousJob {
    replication_id: String,
    template: ChangesQuery,
    source: Arc<dyn Endpoint>,
    target: Arc<dyn Endpoint>,
    /// Registry names the job holds handles for
    local_names: Vec<String>,
    info: Arc<Mutex<TaskInfo>>,
}

/// Run a continuous job until its source feed ends or one of its local
/// databases is destroyed, then drop it from the task table
async fn supervise(job: ContinuousJob, destroyed: broadcast::Receiver<String>, tasks: TaskTable) {
    let replication_id = job.replication_id.clone();
    let local_names = job.local_names.clone();

    tokio::select! {
        _ = continuous_loop(job) => {}
        name = endpoint_destroyed(destroyed, &local_names) => {
            warn!(replication_id = %replication_id, db = %name, "Database destroyed, stopping replication");
        }
    }

    if let Ok(mut tasks) = tasks.lock() {
        tasks.remove(&replication_id);
    }
}

/// Resolves with the first destroyed name out of `names`
async fn endpoint_destroyed(mut destroyed: broadcast::Receiver<String>, names: &[String]) -> String {
    loop {
        match destroyed.recv().await {
            Ok(name) if names.contains(&name) => return name,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

async fn continuous_loop(job: ContinuousJob) {
    let session_id = Uuid::new_v4().simple().to_string();
    let mut since = resume_point(job.target.as_ref(), &job.replication_id).await;

    loop {
        match run_pass(job.source.as_ref(), job.target.as_ref(), &job.template, since.clone()).await {
            Ok(stats) => {
                if stats.docs_read > 0 {
                    checkpoint(job.target.as_ref(), &job.replication_id, &session_id, &stats.end_last_seq).await;
                }
                if let Ok(mut info) = job.info.lock() {
                    info.docs_read += stats.docs_read;
                    info.docs_written += stats.docs_written;
                    info.doc_write_failures += stats.doc_write_failures;
                    info.checkpointed_source_seq = stats.end_last_seq.clone();
                    info.updated_on = Utc::now().timestamp();
                }
                since = Since::from_seq(&stats.end_last_seq);
            }
            Err(err) => {
                warn!(replication_id = %job.replication_id, error = %err, "Continuous pass failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        }

        let wait = ChangesQuery {
            since: since.clone(),
            ..job.template.clone()
        };
        if let Err(err) = job.source.wait_for_change(&wait).await {
            warn!(replication_id = %job.replication_id, error = %err, "Source feed ended, stopping replication");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PutOptions};

    async fn setup(names: &[&str]) -> (Arc<DatabaseRegistry>, Replicator) {
        let registry = Arc::new(DatabaseRegistry::new(Arc::new(MemoryStore::new())));
        for name in names {
            registry.create(name).await.unwrap();
        }
        let replicator = Replicator::new(Arc::clone(&registry));
        (registry, replicator)
    }

    fn request(source: &str, target: &str) -> ReplicationRequest {
        ReplicationRequest {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("http://host/db"));
        assert!(is_remote("https://host/db"));
        assert!(!is_remote("db"));
        assert!(!is_remote("httpdb"));
    }

    #[test]
    fn test_replication_id_depends_on_mode() {
        let mut req = request("a", "b");
        let one_shot = req.replication_id();
        req.continuous = true;
        assert_eq!(req.replication_id(), format!("{}+continuous", one_shot));
    }

    #[tokio::test]
    async fn test_local_replication_records_both_sides() {
        let (registry, replicator) = setup(&["dba", "dbb"]).await;
        let source = registry.resolve("dba").await.unwrap();
        for id in ["x", "y"] {
            source.put(json!({ "_id": id }), PutOptions::default()).await.unwrap();
        }

        let ReplicateReply::Completed(report) = replicator.replicate(request("dba", "dbb")).await.unwrap() else {
            panic!("expected a completed replication");
        };
        assert_eq!(report.docs_written, 2);
        assert!(report.start_time <= report.end_time);
        assert_eq!(report.history.len(), 1);
        assert_eq!(replicator.history().len("dba"), 1);
        assert_eq!(replicator.history().len("dbb"), 1);

        let target = registry.resolve("dbb").await.unwrap();
        assert_eq!(target.info().await.unwrap().doc_count, 2);
    }

    #[tokio::test]
    async fn test_rerun_resumes_from_checkpoint() {
        let (registry, replicator) = setup(&["dba", "dbb"]).await;
        let source = registry.resolve("dba").await.unwrap();
        source.put(json!({"_id": "x"}), PutOptions::default()).await.unwrap();
        replicator.replicate(request("dba", "dbb")).await.unwrap();

        let ReplicateReply::Completed(second) = replicator.replicate(request("dba", "dbb")).await.unwrap() else {
            panic!("expected a completed replication");
        };
        assert_eq!(second.docs_read, 0);
        assert_eq!(second.history.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_history() {
        let (_, replicator) = setup(&["dbb"]).await;
        let err = replicator.replicate(request("ghost", "dbb")).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(replicator.history().is_empty("dbb"));
        assert!(replicator.history().is_empty("ghost"));
    }

    #[tokio::test]
    async fn test_create_target() {
        let (registry, replicator) = setup(&["dba"]).await;
        let mut req = request("dba", "fresh");
        req.create_target = true;
        replicator.replicate(req).await.unwrap();
        assert!(registry.resolve("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn test_continuous_is_acknowledged_and_cancellable() {
        let (registry, replicator) = setup(&["dba", "dbb"]).await;
        let mut req = request("dba", "dbb");
        req.continuous = true;

        let reply = replicator.replicate(req.clone()).await.unwrap();
        assert!(matches!(reply, ReplicateReply::Acknowledged { ok: true, .. }));
        assert_eq!(replicator.active_tasks().unwrap().len(), 1);

        let source = registry.resolve("dba").await.unwrap();
        source.put(json!({"_id": "live"}), PutOptions::default()).await.unwrap();
        let target = registry.resolve("dbb").await.unwrap();
        let mut copied = false;
        for _ in 0..100 {
            if target.info().await.unwrap().doc_count == 1 {
                copied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(copied);

        req.cancel = true;
        replicator.replicate(req.clone()).await.unwrap();
        assert!(replicator.active_tasks().unwrap().is_empty());
        let err = replicator.replicate(req).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    async fn wait_for_no_tasks(replicator: &Replicator) -> bool {
        for _ in 0..100 {
            if replicator.active_tasks().unwrap().is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_destroying_target_stops_continuous() {
        let (registry, replicator) = setup(&["dba", "dbb"]).await;
        let mut req = request("dba", "dbb");
        req.continuous = true;
        replicator.replicate(req).await.unwrap();
        assert_eq!(replicator.active_tasks().unwrap().len(), 1);

        registry.destroy("dbb").await.unwrap();
        assert!(wait_for_no_tasks(&replicator).await);

        let fresh = registry.create("dbb").await.unwrap();
        let source = registry.resolve("dba").await.unwrap();
        source.put(json!({"_id": "after"}), PutOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fresh.info().await.unwrap().doc_count, 0);
    }

    #[tokio::test]
    async fn test_destroying_source_stops_continuous() {
        let (registry, replicator) = setup(&["dba", "dbb"]).await;
        let mut req = request("dba", "dbb");
        req.continuous = true;
        replicator.replicate(req).await.unwrap();

        registry.destroy("dba").await.unwrap();
        assert!(wait_for_no_tasks(&replicator).await);
    }
}
