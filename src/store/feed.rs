use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Collection, Document, SnapshotStream, StoreError, StoreResult};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Changed(Collection),
    /// Delivered as an `Err` item to every live query on the collection.
    Failed(Collection, StoreError),
}

/// In-process change notification shared by the store backends. A write
/// publishes `Changed`; each live query reloads its rows and yields a full
/// snapshot.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: FeedEvent) {
        // No receivers just means nobody is subscribed yet.
        let _ = self.tx.send(event);
    }

    pub fn changed(&self, collection: Collection) {
        self.publish(FeedEvent::Changed(collection));
    }

    /// Builds a snapshot stream for `collection`. `load` runs once up front
    /// and again after every change; the receiver is registered before the
    /// first load so no write can slip between them unseen.
    pub fn watch<F>(&self, collection: Collection, load: F) -> SnapshotStream
    where
        F: Fn() -> BoxFuture<'static, StoreResult<Vec<Document>>> + Send + Sync + 'static,
    {
        let rx = self.tx.subscribe();
        stream::unfold((rx, load, true), move |(mut rx, load, first)| async move {
            if first {
                let snapshot = load().await;
                return Some((snapshot, (rx, load, false)));
            }
            loop {
                match rx.recv().await {
                    Ok(FeedEvent::Changed(changed)) if changed == collection => {
                        let snapshot = load().await;
                        return Some((snapshot, (rx, load, false)));
                    }
                    Ok(FeedEvent::Failed(failed, err)) if failed == collection => {
                        return Some((Err(err), (rx, load, false)));
                    }
                    Ok(_) => continue,
                    // Missed events collapse into one reload.
                    Err(RecvError::Lagged(_)) => {
                        let snapshot = load().await;
                        return Some((snapshot, (rx, load, false)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
