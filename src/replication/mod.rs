//! # Replication Orchestrator
//!
//! One-way synchronization between two databases, each either a local
//! name held by the registry or a remote `http(s)://` CouchDB URL.
//!
//! - [`Replicator`]: runs one-shot passes and continuous background tasks
//! - [`HistoryLog`]: per-database history, capped at [`HISTORY_LIMIT`]
//! - [`Endpoint`]: what a pass needs from either side
//!
//! History is kept only for local endpoints and lives for the process
//! lifetime. Progress checkpoints are stored on the target as `_local`
//! documents so a rerun resumes where the last one stopped.

mod endpoint;
mod errors;
mod history;
mod orchestrator;
mod remote;

pub use endpoint::{Endpoint, LocalEndpoint, WriteOutcome};
pub use errors::{ReplicationError, ReplicationResult};
pub use history::{HistoryEntry, HistoryLog, HISTORY_LIMIT};
pub use orchestrator::{
    is_remote, ReplicateReply, ReplicationReport, ReplicationRequest, Replicator, TaskInfo,
};
pub use remote::RemoteEndpoint;
