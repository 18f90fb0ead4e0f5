use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::model::HistoryEntry;
use crate::store::{Collection, Document, RemoteStore, HOUSEHOLD_FIELD};
use crate::time::now_ms;
use crate::AppResult;

const COUNT_FIELD: &str = "count";

/// NFKC, trimmed, lowercased, inner whitespace collapsed to single spaces.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic counter id: the same household and normalized text always
/// map to the same document.
pub fn history_key(household_id: &str, text: &str) -> String {
    format!("{household_id}:{}", normalize_text(text))
}

fn entry_from(doc: Document) -> AppResult<HistoryEntry> {
    let Document { id, mut data } = doc;
    data.insert("id".into(), Value::String(id));
    Ok(serde_json::from_value(Value::Object(data))?)
}

/// Highest count first; ties go to the most recently used.
pub fn rank(mut entries: Vec<HistoryEntry>, limit: usize) -> Vec<HistoryEntry> {
    entries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_used.cmp(&a.last_used))
            .then_with(|| a.text.cmp(&b.text))
    });
    entries.truncate(limit);
    entries
}

/// "Frequently bought" counters. Recording is a side effect of adding to the
/// shopping list and never fails the add.
#[derive(Clone)]
pub struct History {
    store: Arc<dyn RemoteStore>,
    limit: usize,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl History {
    pub fn new(store: Arc<dyn RemoteStore>, limit: usize) -> Self {
        Self {
            store,
            limit,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Increments the counter for `text` in `household_id`, creating it on
    /// first use.
    pub async fn record(&self, household_id: &str, text: &str, category: &str) -> AppResult<()> {
        let key = history_key(household_id, text);
        let mut fields = Map::new();
        fields.insert(HOUSEHOLD_FIELD.into(), Value::String(household_id.to_string()));
        fields.insert("text".into(), Value::String(text.trim().to_string()));
        fields.insert("category".into(), Value::String(category.to_string()));
        fields.insert("lastUsed".into(), Value::from(now_ms()));
        self.store
            .increment(Collection::History, &key, fields, COUNT_FIELD, 1)
            .await?;
        debug!(target: "larder", event = "history_recorded", household_id, key = %key);
        Ok(())
    }

    /// Fire-and-forget [`History::record`]; failures are logged only.
    pub fn record_in_background(&self, household_id: &str, text: &str, category: &str) {
        let history = self.clone();
        let household_id = household_id.to_string();
        let text = text.to_string();
        let category = category.to_string();
        let handle = tokio::spawn(async move {
            if let Err(err) = history.record(&household_id, &text, &category).await {
                warn!(
                    target: "larder",
                    event = "history_record_failed",
                    household_id = %household_id,
                    error = %err
                );
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }

    /// Waits for every background recording started so far.
    pub async fn flush(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Top entries for quick-add suggestions.
    pub async fn frequent(&self, household_id: &str) -> AppResult<Vec<HistoryEntry>> {
        let docs = self.store.list(Collection::History, household_id).await?;
        let mut entries = Vec::with_capacity(docs.len());
        for doc in docs {
            match entry_from(doc) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    target: "larder",
                    event = "history_entry_skipped",
                    household_id,
                    error = %err
                ),
            }
        }
        Ok(rank(entries, self.limit))
    }
}
