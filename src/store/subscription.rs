//! # Change Subscriptions
//!
//! A live change source handed out by a store. The subscription owns the
//! receiving half of a channel and the task producing into it; cancelling
//! or dropping the subscription stops that task.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::errors::StoreResult;
use super::types::ChangeEvent;

/// Sending half used by store producers
pub type ChangeSender = mpsc::Sender<StoreResult<ChangeEvent>>;

/// Live, cancellable stream of change events in sequence order
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: mpsc::Receiver<StoreResult<ChangeEvent>>,
    producer: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl ChangeSubscription {
    /// Wrap a channel fed by `producer`
    pub fn new(receiver: mpsc::Receiver<StoreResult<ChangeEvent>>, producer: JoinHandle<()>) -> Self {
        Self {
            receiver,
            producer: Some(producer),
            cancelled: false,
        }
    }

    /// Wrap a channel whose producer is managed elsewhere
    pub fn from_receiver(receiver: mpsc::Receiver<StoreResult<ChangeEvent>>) -> Self {
        Self {
            receiver,
            producer: None,
            cancelled: false,
        }
    }

    /// Create a bounded channel pair
    pub fn channel(capacity: usize) -> (ChangeSender, mpsc::Receiver<StoreResult<ChangeEvent>>) {
        mpsc::channel(capacity)
    }

    /// Next event; `None` once the source ends or the subscription is cancelled
    pub async fn next(&mut self) -> Option<StoreResult<ChangeEvent>> {
        if self.cancelled {
            return None;
        }
        self.receiver.recv().await
    }

    /// Stop the producer and discard anything still buffered
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.receiver.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::RevisionRef;
    use serde_json::json;

    fn event(seq: u64) -> ChangeEvent {
        ChangeEvent {
            seq: json!(seq),
            id: format!("doc-{}", seq),
            changes: vec![RevisionRef { rev: "1-a".to_string() }],
            deleted: false,
            doc: None,
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, rx) = ChangeSubscription::channel(8);
        let mut sub = ChangeSubscription::from_receiver(rx);
        tx.send(Ok(event(1))).await.unwrap();
        tx.send(Ok(event(2))).await.unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().seq, json!(1));
        assert_eq!(sub.next().await.unwrap().unwrap().seq, json!(2));
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_events() {
        let (tx, rx) = ChangeSubscription::channel(8);
        let mut sub = ChangeSubscription::from_receiver(rx);
        tx.send(Ok(event(1))).await.unwrap();

        sub.cancel();
        assert!(sub.is_cancelled());
        assert!(sub.next().await.is_none());
        assert!(tx.send(Ok(event(2))).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_aborts_producer() {
        let (tx, rx) = ChangeSubscription::channel(1);
        let watcher = tx.clone();
        let producer = tokio::spawn(async move {
            let mut seq = 0;
            loop {
                seq += 1;
                if tx.send(Ok(event(seq))).await.is_err() {
                    return;
                }
            }
        });
        let sub = ChangeSubscription::new(rx, producer);
        drop(sub);
        tokio::task::yield_now().await;
        assert!(watcher.is_closed());
    }
}
