//! Optimistic synchronisation between local collection state and the remote
//! document store.
//!
//! Local state is written synchronously at call time; the remote write is
//! the returned future. Snapshots from live queries fully replace the known
//! store state, and writes still in flight are re-applied on top of each one
//! until they settle.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::store::{Collection, Document};
use crate::{AppError, AppResult};

pub mod engine;
pub mod local;
pub mod subscription;

pub use engine::{Engine, MutationFuture};
pub use local::{LocalCollection, LocalState, SnapshotSink};
pub use subscription::SubscriptionManager;

/// A household-scoped document type held in a [`LocalCollection`].
pub trait Record:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn household_id(&self) -> &str;
    fn set_household_id(&mut self, household_id: String);
    /// Sort key: local lists are kept newest first.
    fn created_at(&self) -> i64;
}

/// Records that accept partial updates.
pub trait Patchable: Record {
    /// Field delta; unset fields must serialize to nothing.
    type Patch: Serialize;

    /// Adds bookkeeping fields (the modification timestamp) to an update.
    fn stamp(fields: &mut Map<String, Value>, now: i64) {
        fields.insert("updatedAt".into(), Value::from(now));
    }
}

/// Serializes a record into document data. The id lives beside the data,
/// never inside it.
pub fn encode<R: Record>(record: &R) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        _ => Err(AppError::new(
            "RECORD/ENCODE",
            "Record did not serialize to an object",
        )
        .with_context("collection", R::COLLECTION.as_str())),
    }
}

pub fn decode<R: Record>(doc: Document) -> AppResult<R> {
    let Document { id, mut data } = doc;
    data.insert("id".into(), Value::String(id.clone()));
    serde_json::from_value(Value::Object(data)).map_err(|err| {
        AppError::from(err)
            .with_context("collection", R::COLLECTION.as_str())
            .with_context("id", id)
    })
}

pub fn patch_fields<P: Serialize>(patch: &P) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(patch)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(AppError::new(
            "RECORD/ENCODE",
            "Patch did not serialize to an object",
        )),
    }
}

/// Applies `fields` on top of `record`: present keys overwrite, absent keys
/// keep their current value.
pub fn merge<R: Record>(record: &R, fields: &Map<String, Value>) -> AppResult<R> {
    let mut data = encode(record)?;
    for (key, value) in fields {
        data.insert(key.clone(), value.clone());
    }
    decode(Document::new(record.id(), data))
}

/// Newest first by `createdAt`; ties fall back to id so the order is total.
pub fn sort_newest_first<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}
