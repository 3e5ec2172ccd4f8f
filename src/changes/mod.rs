//! # Changes Feed Engine
//!
//! Serves `_changes` in its three modes:
//!
//! - `normal`: one non-live query, answered as `{results, last_seq}`
//! - `longpoll`: a non-live query first; when empty, a live subscription that
//!   answers with the first change and then cancels
//! - `continuous`: a live subscription streamed as JSON lines, with a
//!   bare newline on every heartbeat tick
//!
//! Live modes hand back a [`LiveFeed`] that owns the subscription and the
//! heartbeat timer together.

mod engine;
mod live;
mod query;

pub use engine::{open_feed, FeedResponse};
pub use live::{FeedChunk, LiveFeed};
pub use query::{ChangeFeedQuery, FeedMode};
