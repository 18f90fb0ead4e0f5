use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;
use crate::store::Collection;
use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

/// Rejections the caller caused; logged at warn rather than error.
fn is_caller_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Validation
            | ErrorKind::NoHousehold
            | ErrorKind::NotFound
            | ErrorKind::Pending
            | ErrorKind::Expired
    )
}

/// Structured log lifecycle of one optimistic mutation: `enter` when the
/// local write is applied, then exactly one of success, failure or
/// discard once the remote settles.
pub struct MutationScope {
    op: &'static str,
    collection: Collection,
    household_id: Option<String>,
    start: Instant,
}

impl MutationScope {
    pub fn new(op: &'static str, collection: Collection, household_id: Option<&str>) -> Self {
        let scope = Self {
            op,
            collection,
            household_id: household_id.map(str::to_string),
            start: Instant::now(),
        };
        debug!(
            target: "larder",
            area = "sync",
            op = scope.op,
            collection = scope.collection.as_str(),
            household_id = scope.household_id.as_deref(),
            details = %json!({ "stage": "enter" })
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, id: Option<&str>) {
        info!(
            target: "larder",
            area = "sync",
            op = self.op,
            collection = self.collection.as_str(),
            household_id = self.household_id.as_deref(),
            id = id,
            duration_ms = self.elapsed_ms(),
            details = %json!({ "stage": "confirmed" })
        );
    }

    /// The remote settled after the household changed; its local effect was dropped.
    pub fn discarded(&self, id: Option<&str>) {
        info!(
            target: "larder",
            area = "sync",
            op = self.op,
            collection = self.collection.as_str(),
            household_id = self.household_id.as_deref(),
            id = id,
            duration_ms = self.elapsed_ms(),
            details = %json!({ "stage": "stale_partition" })
        );
    }

    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }
        if let Some(cause) = err.cause() {
            map.insert("cause".into(), Value::String(cause.to_string()));
        }
        let details = Value::Object(map);

        if is_caller_error(err.kind()) {
            warn!(
                target: "larder",
                area = "sync",
                op = self.op,
                collection = self.collection.as_str(),
                household_id = self.household_id.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
            return;
        }

        error!(
            target: "larder",
            area = "sync",
            op = self.op,
            collection = self.collection.as_str(),
            household_id = self.household_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
