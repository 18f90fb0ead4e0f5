use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::local::SnapshotSink;
use crate::household_active::SessionState;
use crate::store::RemoteStore;

struct ActiveSubscriptions {
    household_id: String,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for ActiveSubscriptions {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    sinks: Mutex<Vec<Arc<dyn SnapshotSink>>>,
    active: Mutex<Option<ActiveSubscriptions>>,
}

/// Keeps exactly one live query per registered collection for the active
/// household, feeding each snapshot into that collection's local state.
///
/// Queries filter on the household only. The store is never asked to order
/// results, which keeps it free of composite index requirements; local state
/// sorts every snapshot itself.
///
/// A failing live query is logged and otherwise ignored: the last good
/// snapshot stays on screen. That hides staleness from the user, which is
/// why the failure is logged at error level.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sinks: Mutex::new(Vec::new()),
                active: Mutex::new(None),
            }),
        }
    }

    fn sinks(&self) -> MutexGuard<'_, Vec<Arc<dyn SnapshotSink>>> {
        self.inner.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSubscriptions>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a collection. If a household is active, its query starts now.
    pub fn register(&self, sink: Arc<dyn SnapshotSink>) {
        let mut active = self.active();
        if let Some(current) = active.as_mut() {
            let epoch = sink.reset(Some(current.household_id.clone()));
            current
                .tasks
                .push(self.spawn_query(sink.clone(), current.household_id.clone(), epoch));
        }
        self.sinks().push(sink);
    }

    pub fn active_household(&self) -> Option<String> {
        self.active()
            .as_ref()
            .map(|current| current.household_id.clone())
    }

    /// Points every collection at `household_id`. Queries for the previous
    /// household are torn down and local state is cleared. `None` leaves no
    /// query running. Re-activating the current household does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn activate(&self, household_id: Option<&str>) {
        let mut active = self.active();
        let previous = active.as_ref().map(|current| current.household_id.clone());
        if previous.as_deref() == household_id {
            return;
        }
        // Dropping the old set aborts its tasks.
        *active = None;

        let sinks = self.sinks().clone();
        let mut tasks = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let epoch = sink.reset(household_id.map(str::to_string));
            if let Some(household_id) = household_id {
                tasks.push(self.spawn_query(sink, household_id.to_string(), epoch));
            }
        }
        if let Some(household_id) = household_id {
            *active = Some(ActiveSubscriptions {
                household_id: household_id.to_string(),
                tasks,
            });
        }

        info!(
            target: "larder",
            event = "subscriptions_switched",
            from = previous.as_deref(),
            to = household_id
        );
    }

    pub fn shutdown(&self) {
        self.activate(None);
    }

    /// Follows session changes, re-pointing queries whenever the active
    /// household changes. Ends when the session handle is dropped.
    pub fn follow(&self, mut session: watch::Receiver<Option<SessionState>>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let household_id = session
                    .borrow_and_update()
                    .as_ref()
                    .map(|state| state.household_id.clone());
                manager.activate(household_id.as_deref());
                if session.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_query(
        &self,
        sink: Arc<dyn SnapshotSink>,
        household_id: String,
        epoch: u64,
    ) -> JoinHandle<()> {
        let collection = sink.collection();
        let mut snapshots = self.inner.store.subscribe(collection, &household_id);
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                match snapshot {
                    Ok(docs) => {
                        let count = docs.len();
                        if !sink.apply(epoch, docs) {
                            debug!(
                                target: "larder",
                                event = "subscription_stale",
                                collection = %collection,
                                household_id = %household_id
                            );
                            break;
                        }
                        debug!(
                            target: "larder",
                            event = "snapshot_applied",
                            collection = %collection,
                            household_id = %household_id,
                            count
                        );
                    }
                    Err(err) => {
                        error!(
                            target: "larder",
                            event = "subscription_error",
                            collection = %collection,
                            household_id = %household_id,
                            error = %err,
                            "live query failed; keeping the last snapshot"
                        );
                    }
                }
            }
        })
    }
}
