use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::feed::{ChangeFeed, FeedEvent};
use super::{
    apply_increment, merge_fields, Collection, Document, RemoteStore, SnapshotStream, StoreError,
    StoreResult,
};
use crate::id::new_document_id;

/// Write primitives that fault injection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Put,
    Update,
    Delete,
    Increment,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    queued: VecDeque<(WriteOp, StoreError)>,
}

type Tables = HashMap<Collection, BTreeMap<String, Map<String, Value>>>;

struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    paused: watch::Sender<HashSet<Collection>>,
    feed: ChangeFeed,
}

/// In-process document store. Cheap to clone; clones share the same data.
///
/// Besides serving as the default backend for tests and demos it can
/// simulate the failure modes the sync layer has to survive: an offline
/// remote (`set_offline`), one-shot write failures (`fail_next`), broken
/// live queries (`inject_subscription_error`) and writes held in flight
/// (`pause_writes`).
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(HashSet::new());
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                paused,
                feed: ChangeFeed::new(),
            }),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.shared.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.shared.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// While offline every write fails with [`StoreError::Unavailable`].
    /// Reads and live queries keep serving the last known data.
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
    }

    /// Fails the next `op` with `err`. Queued faults are consumed in order.
    pub fn fail_next(&self, op: WriteOp, err: StoreError) {
        self.faults().queued.push_back((op, err));
    }

    /// Pushes an error item into every live query on `collection`.
    pub fn inject_subscription_error(&self, collection: Collection, err: StoreError) {
        self.shared.feed.publish(FeedEvent::Failed(collection, err));
    }

    /// Holds every write to `collection` at its start until
    /// `resume_writes` is called for it.
    pub fn pause_writes(&self, collection: Collection) {
        self.shared.paused.send_modify(|paused| {
            paused.insert(collection);
        });
    }

    pub fn resume_writes(&self, collection: Collection) {
        self.shared.paused.send_modify(|paused| {
            paused.remove(&collection);
        });
    }

    /// Writes a document directly, as another household member's device would.
    pub fn insert_raw(&self, collection: Collection, id: &str, data: Map<String, Value>) {
        self.tables()
            .entry(collection)
            .or_default()
            .insert(id.to_string(), data);
        self.shared.feed.changed(collection);
    }

    /// Removes a document directly, bypassing faults and the write gate.
    pub fn remove_raw(&self, collection: Collection, id: &str) {
        if let Some(table) = self.tables().get_mut(&collection) {
            table.remove(id);
        }
        self.shared.feed.changed(collection);
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Map<String, Value>> {
        self.tables()
            .get(&collection)
            .and_then(|table| table.get(id))
            .cloned()
    }

    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.tables()
            .get(&collection)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn query(&self, collection: Collection, household_id: &str) -> Vec<Document> {
        self.documents(collection)
            .into_iter()
            .filter(|doc| doc.in_household(household_id))
            .collect()
    }

    async fn admit(&self, op: WriteOp, collection: Collection) -> StoreResult<()> {
        let mut paused = self.shared.paused.subscribe();
        // The sender lives in `shared`, so this only errors if the store is gone.
        let _ = paused
            .wait_for(|paused| !paused.contains(&collection))
            .await;

        let mut faults = self.faults();
        if let Some(pos) = faults.queued.iter().position(|(queued, _)| *queued == op) {
            if let Some((_, err)) = faults.queued.remove(pos) {
                return Err(err);
            }
        }
        if faults.offline {
            return Err(StoreError::Unavailable("remote store is offline".into()));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn subscribe(&self, collection: Collection, household_id: &str) -> SnapshotStream {
        let store = self.clone();
        let household_id = household_id.to_string();
        self.shared.feed.watch(collection, move || {
            let docs = store.query(collection, &household_id);
            async move { Ok::<_, StoreError>(docs) }.boxed()
        })
    }

    fn list<'a>(
        &'a self,
        collection: Collection,
        household_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<Document>>> {
        async move { Ok(self.query(collection, household_id)) }.boxed()
    }

    fn get<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Document>>> {
        async move {
            Ok(self
                .document(collection, id)
                .map(|data| Document::new(id, data)))
        }
        .boxed()
    }

    fn create<'a>(
        &'a self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<String>> {
        async move {
            self.admit(WriteOp::Create, collection).await?;
            let id = new_document_id();
            self.tables()
                .entry(collection)
                .or_default()
                .insert(id.clone(), data);
            self.shared.feed.changed(collection);
            Ok(id)
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.admit(WriteOp::Put, collection).await?;
            self.tables()
                .entry(collection)
                .or_default()
                .insert(id.to_string(), data);
            self.shared.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.admit(WriteOp::Update, collection).await?;
            {
                let mut tables = self.tables();
                let doc = tables
                    .get_mut(&collection)
                    .and_then(|table| table.get_mut(id))
                    .ok_or_else(|| StoreError::NotFound {
                        collection,
                        id: id.to_string(),
                    })?;
                merge_fields(doc, fields);
            }
            self.shared.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.admit(WriteOp::Delete, collection).await?;
            let removed = self
                .tables()
                .get_mut(&collection)
                .and_then(|table| table.remove(id));
            if removed.is_none() {
                return Err(StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                });
            }
            self.shared.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn increment<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
        counter: &'a str,
        by: i64,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.admit(WriteOp::Increment, collection).await?;
            {
                let mut tables = self.tables();
                let doc = tables
                    .entry(collection)
                    .or_default()
                    .entry(id.to_string())
                    .or_default();
                apply_increment(doc, fields, counter, by);
            }
            self.shared.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn subscribe_filters_by_household() {
        let store = MemoryStore::new();
        store.insert_raw(Collection::Inventory, "a", object(json!({ "householdId": "h1" })));
        store.insert_raw(Collection::Inventory, "b", object(json!({ "householdId": "h2" })));

        let mut stream = store.subscribe(Collection::Inventory, "h1");
        let snapshot = stream.next().await.expect("snapshot").expect("ok");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "a");

        store
            .create(Collection::Inventory, object(json!({ "householdId": "h1" })))
            .await
            .expect("create");
        let snapshot = stream.next().await.expect("snapshot").expect("ok");
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn queued_faults_hit_only_their_operation_once() {
        let store = MemoryStore::new();
        store.fail_next(WriteOp::Delete, StoreError::PermissionDenied("nope".into()));

        let id = store
            .create(Collection::Inventory, object(json!({ "householdId": "h1" })))
            .await
            .expect("create is unaffected");
        let err = store
            .delete(Collection::Inventory, &id)
            .await
            .expect_err("queued fault");
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        store
            .delete(Collection::Inventory, &id)
            .await
            .expect("fault consumed");
    }

    #[tokio::test]
    async fn offline_rejects_writes_but_serves_reads() {
        let store = MemoryStore::new();
        store.insert_raw(Collection::Inventory, "a", object(json!({ "householdId": "h1" })));
        store.set_offline(true);

        let err = store
            .update(Collection::Inventory, "a", object(json!({ "quantity": 2 })))
            .await
            .expect_err("offline");
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.list(Collection::Inventory, "h1").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_documents() {
        let store = MemoryStore::new();
        let err = store
            .update(Collection::ShoppingList, "ghost", Map::new())
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
        let err = store
            .delete(Collection::ShoppingList, "ghost")
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn paused_writes_complete_after_resume() {
        let store = MemoryStore::new();
        store.pause_writes(Collection::Categories);

        let write = store.put(Collection::Categories, "c1", object(json!({ "name": "Spices" })));
        futures::pin_mut!(write);
        assert!(futures::poll!(write.as_mut()).is_pending());
        assert!(store.document(Collection::Categories, "c1").is_none());
        store
            .put(Collection::Users, "u1", object(json!({ "email": "a@b" })))
            .await
            .expect("other collections keep flowing");

        store.resume_writes(Collection::Categories);
        write.await.expect("put");
        assert!(store.document(Collection::Categories, "c1").is_some());
    }
}
