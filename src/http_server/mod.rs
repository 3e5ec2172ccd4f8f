//! # HTTP Server Module
//!
//! The CouchDB-compatible HTTP surface. Route files translate requests
//! into registry, changes and replication calls; [`errors`] and
//! [`response`] translate results back into protocol responses.
//!
//! # Endpoints
//!
//! - `/`, `/_all_dbs`, `/_uuids`, `/_replicate`, `/_active_tasks`, `/_session`
//! - `/{db}` plus `_all_docs`, `_bulk_docs`, `_revs_diff`, `_compact`, `_changes`
//! - `/{db}/{id}` and `/{db}/{id}/{attachment}`, including `_design` and `_local` ids

pub mod changes_routes;
pub mod config;
pub mod database_routes;
pub mod document_routes;
pub mod errors;
pub mod request;
pub mod response;
pub mod server;
pub mod server_routes;

pub use config::GatewayConfig;
pub use errors::{ApiError, ApiResult};
pub use server::{build_router, HttpServer};
