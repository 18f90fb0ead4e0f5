//! The remote document store the sync core talks to.
//!
//! Backends expose documents as `{ id, data }` pairs where `data` is a JSON
//! object. Every household-scoped document carries the partition field
//! [`HOUSEHOLD_FIELD`]; `subscribe` and `list` filter on it by equality only.
//! Ordering is never requested from the backend, so no composite index is
//! needed; callers sort client-side.

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod feed;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Partition key present on every household-scoped document.
pub const HOUSEHOLD_FIELD: &str = "householdId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "inventory")]
    Inventory,
    #[serde(rename = "shopping-list")]
    ShoppingList,
    #[serde(rename = "categories")]
    Categories,
    #[serde(rename = "shopping-history")]
    History,
    #[serde(rename = "users")]
    Users,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Inventory,
        Collection::ShoppingList,
        Collection::Categories,
        Collection::History,
        Collection::Users,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Inventory => "inventory",
            Collection::ShoppingList => "shopping-list",
            Collection::Categories => "categories",
            Collection::History => "shopping-history",
            Collection::Users => "users",
        }
    }

    pub fn parse(name: &str) -> Option<Collection> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn household_id(&self) -> Option<&str> {
        self.data.get(HOUSEHOLD_FIELD).and_then(Value::as_str)
    }

    pub fn in_household(&self, household_id: &str) -> bool {
        self.household_id() == Some(household_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{collection}/{id} not found")]
    NotFound { collection: Collection, id: String },
    #[error("invalid document: {0}")]
    Invalid(String),
    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Full-collection snapshots for one `(collection, household)` query. Each
/// item replaces the previous one; an `Err` item does not end the stream.
pub type SnapshotStream = BoxStream<'static, StoreResult<Vec<Document>>>;

pub trait RemoteStore: Send + Sync + 'static {
    /// Live query over `collection` filtered by `householdId == household_id`.
    /// Yields the current contents first, then a fresh snapshot after every
    /// change to the collection.
    fn subscribe(&self, collection: Collection, household_id: &str) -> SnapshotStream;

    /// One-shot read of the same query `subscribe` runs.
    fn list<'a>(
        &'a self,
        collection: Collection,
        household_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<Document>>>;

    fn get<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Document>>>;

    /// Inserts a document under a store-generated id and returns that id.
    fn create<'a>(
        &'a self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<String>>;

    /// Writes a document under a caller-chosen id, replacing any existing one.
    fn put<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Merges `fields` into an existing document. Missing documents yield
    /// [`StoreError::NotFound`].
    fn update<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn delete<'a>(&'a self, collection: Collection, id: &'a str)
        -> BoxFuture<'a, StoreResult<()>>;

    /// Atomic upsert: merges `fields` into the document (creating it when
    /// absent) and adds `by` to the integer field `counter`, which starts at
    /// zero for new documents.
    fn increment<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
        counter: &'a str,
        by: i64,
    ) -> BoxFuture<'a, StoreResult<()>>;
}

/// Shallow merge of `fields` into `target`, the update semantics every
/// backend shares.
pub(crate) fn merge_fields(target: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

pub(crate) fn apply_increment(
    target: &mut Map<String, Value>,
    fields: Map<String, Value>,
    counter: &str,
    by: i64,
) {
    let current = target.get(counter).and_then(Value::as_i64).unwrap_or(0);
    merge_fields(target, fields);
    target.insert(counter.to_string(), Value::from(current + by));
}
