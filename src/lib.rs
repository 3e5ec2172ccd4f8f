//! couchgate - a CouchDB-compatible HTTP gateway over an embedded document store
//!
//! Request flow: the router resolves the target database through the
//! [`registry`], dispatches to the [`changes`] engine, the [`replication`]
//! orchestrator or a direct store call, and translates the result in
//! [`http_server`].

pub mod changes;
pub mod cli;
pub mod gateway;
pub mod http_server;
pub mod registry;
pub mod replication;
pub mod store;

pub use gateway::Gateway;
