//! Live feeds: a change subscription paired with its heartbeat timer.
//!
//! Both are owned by one [`LiveFeed`] and released together, when the feed
//! terminates or when it is dropped (client disconnect).

use std::convert::Infallible;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde_json::json;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::store::{ChangeEvent, ChangeSubscription, StoreResult};

/// One piece of output written to the client
#[derive(Debug, Clone, PartialEq)]
pub enum FeedChunk {
    /// Bare newline keeping an idle connection open
    Heartbeat,
    /// Continuous mode: one change as a JSON line
    Line(ChangeEvent),
    /// Longpoll mode: the single-event result object
    Result(ChangeEvent),
}

impl FeedChunk {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FeedChunk::Heartbeat => b"\n".to_vec(),
            FeedChunk::Line(event) => {
                let mut line = serde_json::to_vec(&event).unwrap_or_default();
                line.push(b'\n');
                line
            }
            FeedChunk::Result(event) => {
                let last_seq = event.seq.clone();
                let mut body = json!({ "results": [event], "last_seq": last_seq })
                    .to_string()
                    .into_bytes();
                body.push(b'\n');
                body
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveKind {
    Longpoll,
    Continuous,
}

/// An open live feed
#[derive(Debug)]
pub struct LiveFeed {
    db: String,
    kind: LiveKind,
    subscription: Option<ChangeSubscription>,
    heartbeat: Option<Interval>,
}

impl LiveFeed {
    /// Stream every change as a JSON line
    pub fn continuous(db: &str, subscription: ChangeSubscription, heartbeat: Duration) -> Self {
        Self::new(db, LiveKind::Continuous, subscription, heartbeat)
    }

    /// Wait for a single change
    pub fn longpoll(db: &str, subscription: ChangeSubscription, heartbeat: Duration) -> Self {
        Self::new(db, LiveKind::Longpoll, subscription, heartbeat)
    }

    fn new(db: &str, kind: LiveKind, subscription: ChangeSubscription, heartbeat: Duration) -> Self {
        let mut timer = interval_at(Instant::now() + heartbeat, heartbeat);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(db, ?kind, heartbeat_ms = heartbeat.as_millis() as u64, "Opened live changes feed");
        Self {
            db: db.to_string(),
            kind,
            subscription: Some(subscription),
            heartbeat: Some(timer),
        }
    }

    /// Next chunk to write, or `None` once the feed has terminated
    pub async fn next_chunk(&mut self) -> Option<StoreResult<FeedChunk>> {
        let (Some(subscription), Some(heartbeat)) = (self.subscription.as_mut(), self.heartbeat.as_mut()) else {
            return None;
        };

        tokio::select! {
            biased;
            event = subscription.next() => match event {
                Some(Ok(event)) => match self.kind {
                    LiveKind::Continuous => Some(Ok(FeedChunk::Line(event))),
                    LiveKind::Longpoll => {
                        self.terminate();
                        Some(Ok(FeedChunk::Result(event)))
                    }
                },
                Some(Err(err)) => {
                    self.terminate();
                    Some(Err(err))
                }
                None => {
                    self.terminate();
                    None
                }
            },
            _ = heartbeat.tick() => Some(Ok(FeedChunk::Heartbeat)),
        }
    }

    /// Cancel the subscription and stop the timer
    pub fn terminate(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            debug!(db = %self.db, "Closed live changes feed");
        }
        self.heartbeat = None;
    }

    pub fn is_terminated(&self) -> bool {
        self.subscription.is_none()
    }

    /// Byte stream starting with an already produced chunk.
    ///
    /// Errors after the first chunk end the stream without an error body.
    pub fn into_stream(self, first: FeedChunk) -> impl Stream<Item = Result<Vec<u8>, Infallible>> + Send {
        stream::unfold((Some(first), self), |(pending, mut feed)| async move {
            if let Some(chunk) = pending {
                return Some((Ok(chunk.into_bytes()), (None, feed)));
            }
            match feed.next_chunk().await {
                Some(Ok(chunk)) => Some((Ok(chunk.into_bytes()), (None, feed))),
                Some(Err(err)) => {
                    debug!(db = %feed.db, error = %err, "Live changes feed ended by error");
                    None
                }
                None => None,
            }
        })
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.terminate();
    }
}
