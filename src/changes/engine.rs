//! Feed dispatch.

use tracing::debug;

use super::live::LiveFeed;
use super::query::{ChangeFeedQuery, FeedMode};
use crate::store::{ChangesResponse, Database, Since, StoreResult};

/// Outcome of opening a feed
#[derive(Debug)]
pub enum FeedResponse {
    /// A complete `{results, last_seq}` body
    Complete(ChangesResponse),
    /// An open live feed still to be drained
    Stream(LiveFeed),
}

/// Open a changes feed against `db` in the mode the query selects
pub async fn open_feed(db: &dyn Database, query: &ChangeFeedQuery) -> StoreResult<FeedResponse> {
    match query.mode {
        FeedMode::Normal => {
            let response = db.changes(&query.to_store_query(false)).await?;
            Ok(FeedResponse::Complete(response))
        }
        FeedMode::Longpoll => {
            let backlog = db.changes(&query.to_store_query(false)).await?;
            if !backlog.results.is_empty() {
                return Ok(FeedResponse::Complete(backlog));
            }
            // wait from where the backlog query ended
            let mut live = query.to_store_query(true);
            live.since = Since::from_seq(&backlog.last_seq);
            debug!(db = db.name(), last_seq = %backlog.last_seq, "Longpoll backlog empty, waiting");
            let subscription = db.subscribe(&live).await?;
            Ok(FeedResponse::Stream(LiveFeed::longpoll(
                db.name(),
                subscription,
                query.heartbeat,
            )))
        }
        FeedMode::Continuous => {
            let subscription = db.subscribe(&query.to_store_query(true)).await?;
            Ok(FeedResponse::Stream(LiveFeed::continuous(
                db.name(),
                subscription,
                query.heartbeat,
            )))
        }
    }
}
