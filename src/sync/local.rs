use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::warn;

use super::{decode, merge, sort_newest_first, Record};
use crate::store::{Collection, Document};

/// An optimistic write the store has not settled yet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingChange<R> {
    /// A new record under its temporary id, shown first.
    Create(R),
    /// A record written back under its own id, shown at its sorted position.
    Restore(R),
    Patch(Map<String, Value>),
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingWrite<R> {
    seq: u64,
    id: String,
    change: PendingChange<R>,
}

/// Local view of one collection for the active household.
///
/// `epoch` increases every time the partition is reset. Work that captured
/// an older epoch (a snapshot from a torn-down query, a write that settles
/// after a household switch) is discarded instead of bleeding into the new
/// partition.
///
/// `records` is always the last known store state with every pending write
/// applied on top, oldest first. A snapshot replaces the store state only,
/// so writes still in flight stay visible across it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalState<R> {
    pub household_id: Option<String>,
    pub epoch: u64,
    /// Set once the first snapshot for the current partition has arrived.
    pub loaded: bool,
    pub records: Vec<R>,
    base: Vec<R>,
    pending: Vec<PendingWrite<R>>,
    next_seq: u64,
}

impl<R> Default for LocalState<R> {
    fn default() -> Self {
        Self {
            household_id: None,
            epoch: 0,
            loaded: false,
            records: Vec::new(),
            base: Vec::new(),
            pending: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<R: Record> LocalState<R> {
    /// Number of writes still waiting on the store.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn rebuild(&mut self) {
        let mut records = self.base.clone();
        for write in &self.pending {
            apply_change(&mut records, &write.id, &write.change);
        }
        self.records = records;
    }
}

fn apply_change<R: Record>(records: &mut Vec<R>, id: &str, change: &PendingChange<R>) {
    match change {
        PendingChange::Create(record) => {
            if position(records, id).is_none() {
                records.insert(0, record.clone());
            }
        }
        PendingChange::Restore(record) => {
            if position(records, id).is_none() {
                insert_sorted(records, record.clone());
            }
        }
        PendingChange::Patch(fields) => {
            // A record deleted remotely in the meantime is not resurrected.
            if let Some(index) = position(records, id) {
                match merge(&records[index], fields) {
                    Ok(patched) => records[index] = patched,
                    Err(err) => warn!(
                        target: "larder",
                        event = "pending_patch_skipped",
                        collection = %R::COLLECTION,
                        id,
                        error = %err
                    ),
                }
            }
        }
        PendingChange::Remove => {
            remove(records, id);
        }
    }
}

/// Observable, cheaply cloneable handle on a [`LocalState`].
pub struct LocalCollection<R> {
    tx: Arc<watch::Sender<LocalState<R>>>,
}

impl<R> Clone for LocalCollection<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Record> Default for LocalCollection<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> LocalCollection<R> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LocalState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Change notifications for UI collaborators.
    pub fn watch(&self) -> watch::Receiver<LocalState<R>> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> LocalState<R> {
        self.tx.borrow().clone()
    }

    pub fn records(&self) -> Vec<R> {
        self.tx.borrow().records.clone()
    }

    pub fn get(&self, id: &str) -> Option<R> {
        self.tx
            .borrow()
            .records
            .iter()
            .find(|record| record.id() == id)
            .cloned()
    }

    pub fn household_id(&self) -> Option<String> {
        self.tx.borrow().household_id.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.tx.borrow().loaded
    }

    /// The active household and its epoch, captured by value at call time.
    pub fn partition(&self) -> Option<(String, u64)> {
        let state = self.tx.borrow();
        state
            .household_id
            .clone()
            .map(|household_id| (household_id, state.epoch))
    }

    /// Resolves once the current partition has received its first snapshot.
    /// Returns `false` when no household is active.
    pub async fn wait_loaded(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let result = rx
            .wait_for(|state| state.household_id.is_none() || state.loaded)
            .await
            .map(|state| state.loaded);
        result.unwrap_or(false)
    }

    /// Clears local state and points it at `household_id`. Pending writes of
    /// the old partition are forgotten. Returns the new epoch.
    pub(crate) fn reset(&self, household_id: Option<String>) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|state| {
            state.epoch += 1;
            state.household_id = household_id;
            state.loaded = false;
            state.records.clear();
            state.base.clear();
            state.pending.clear();
            epoch = state.epoch;
        });
        epoch
    }

    /// Replaces the store state wholesale if `epoch` is still current, then
    /// re-applies pending writes on top.
    pub(crate) fn apply_snapshot(&self, epoch: u64, mut records: Vec<R>) -> bool {
        sort_newest_first(&mut records);
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.base = records;
            state.rebuild();
            state.loaded = true;
            true
        })
    }

    /// Applies `change` to record `id` if `epoch` is still current and keeps
    /// it pending until [`LocalCollection::confirm`] or
    /// [`LocalCollection::revert`]. Returns the write's sequence number.
    pub(crate) fn stage(&self, epoch: u64, id: &str, change: PendingChange<R>) -> Option<u64> {
        let mut seq = None;
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.next_seq += 1;
            let write = PendingWrite {
                seq: state.next_seq,
                id: id.to_string(),
                change,
            };
            apply_change(&mut state.records, &write.id, &write.change);
            seq = Some(write.seq);
            state.pending.push(write);
            true
        });
        seq
    }

    /// The store accepted write `seq`: it becomes part of the known store
    /// state until the next snapshot supersedes it. `store_id` replaces the
    /// temporary id of a confirmed create. Returns `false` once the
    /// partition has moved on.
    pub(crate) fn confirm(&self, epoch: u64, seq: u64, store_id: Option<&str>) -> bool {
        self.settle(epoch, seq, |base, write| {
            let PendingWrite { id, change, .. } = write;
            match change {
                PendingChange::Create(mut record) | PendingChange::Restore(mut record) => {
                    let id = store_id.map(str::to_string).unwrap_or(id);
                    // A snapshot may already have delivered the stored copy.
                    if position(base, &id).is_none() {
                        record.set_id(id);
                        insert_sorted(base, record);
                    }
                }
                PendingChange::Patch(fields) => {
                    if let Some(index) = position(base, &id) {
                        if let Ok(patched) = merge(&base[index], &fields) {
                            base[index] = patched;
                        }
                    }
                }
                PendingChange::Remove => {
                    remove(base, &id);
                }
            }
        })
    }

    /// The store rejected write `seq`: it is dropped and the record shows
    /// the known store state again. Returns `false` once the partition has
    /// moved on.
    pub(crate) fn revert(&self, epoch: u64, seq: u64) -> bool {
        self.settle(epoch, seq, |_, _| {})
    }

    fn settle(
        &self,
        epoch: u64,
        seq: u64,
        fold: impl FnOnce(&mut Vec<R>, PendingWrite<R>),
    ) -> bool {
        let mut settled = false;
        self.tx.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            let Some(index) = state.pending.iter().position(|write| write.seq == seq) else {
                return false;
            };
            let write = state.pending.remove(index);
            fold(&mut state.base, write);
            state.rebuild();
            settled = true;
            true
        });
        settled
    }
}

pub(crate) fn position<R: Record>(records: &[R], id: &str) -> Option<usize> {
    records.iter().position(|record| record.id() == id)
}

pub(crate) fn remove<R: Record>(records: &mut Vec<R>, id: &str) -> Option<R> {
    position(records, id).map(|index| records.remove(index))
}

/// Inserts `record` where the newest-first order puts it.
pub(crate) fn insert_sorted<R: Record>(records: &mut Vec<R>, record: R) {
    records.push(record);
    sort_newest_first(records);
}

/// Type-erased target for live-query snapshots, so one subscription manager
/// can drive collections of different record types.
pub trait SnapshotSink: Send + Sync {
    fn collection(&self) -> Collection;
    fn reset(&self, household_id: Option<String>) -> u64;
    /// Returns `false` once `epoch` is stale; the caller should stop feeding it.
    fn apply(&self, epoch: u64, docs: Vec<Document>) -> bool;
}

impl<R: Record> SnapshotSink for LocalCollection<R> {
    fn collection(&self) -> Collection {
        R::COLLECTION
    }

    fn reset(&self, household_id: Option<String>) -> u64 {
        LocalCollection::reset(self, household_id)
    }

    fn apply(&self, epoch: u64, docs: Vec<Document>) -> bool {
        let records = docs
            .into_iter()
            .filter_map(|doc| match decode::<R>(doc) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(
                        target: "larder",
                        event = "snapshot_record_skipped",
                        collection = %R::COLLECTION,
                        error = %err
                    );
                    None
                }
            })
            .collect();
        self.apply_snapshot(epoch, records)
    }
}
