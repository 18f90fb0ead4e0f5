use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::categories::{group_by, resolve_category};
use crate::history::History;
use crate::id::is_temp_id;
use crate::model::{InventoryItem, NewShoppingEntry, ShoppingEntry, ShoppingPatch};
use crate::sync::engine::{record_not_found, reject};
use crate::sync::{Engine, LocalCollection, LocalState, MutationFuture, Record};
use crate::time::now_ms;
use crate::AppError;

/// The most recent deletion, restorable until `expires_at`.
struct UndoTicket {
    record: ShoppingEntry,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct ShoppingList {
    engine: Engine<ShoppingEntry>,
    history: History,
    undo_window: Duration,
    undo: Arc<Mutex<Option<UndoTicket>>>,
}

impl ShoppingList {
    pub fn new(engine: Engine<ShoppingEntry>, history: History, undo_window: Duration) -> Self {
        Self {
            engine,
            history,
            undo_window,
            undo: Arc::new(Mutex::new(None)),
        }
    }

    fn ticket(&self) -> MutexGuard<'_, Option<UndoTicket>> {
        self.undo.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn local(&self) -> &LocalCollection<ShoppingEntry> {
        self.engine.local()
    }

    pub fn entries(&self) -> Vec<ShoppingEntry> {
        self.engine.local().records()
    }

    pub fn watch(&self) -> watch::Receiver<LocalState<ShoppingEntry>> {
        self.engine.local().watch()
    }

    /// Adds an entry and bumps its purchase counter in the background.
    pub fn add(&self, draft: NewShoppingEntry, owner_id: &str) -> MutationFuture<String> {
        let text = draft.text.trim().to_string();
        if text.is_empty() {
            return reject(AppError::validation(
                "TEXT_REQUIRED",
                "Enter something to add to the list.",
            ));
        }
        let quantity = draft.quantity.unwrap_or(1);
        if quantity == 0 {
            return reject(AppError::validation(
                "QUANTITY_INVALID",
                "Quantity must be at least 1.",
            ));
        }
        let now = now_ms();
        let entry = ShoppingEntry {
            id: String::new(),
            category: resolve_category(draft.category.as_deref(), &text),
            text,
            quantity,
            completed: false,
            household_id: String::new(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        let household_id = self.engine.local().household_id();
        let (text, category) = (entry.text.clone(), entry.category.clone());

        let pending = self.engine.create(entry);
        if let Some(household_id) = household_id {
            self.history
                .record_in_background(&household_id, &text, &category);
        }
        pending
    }

    /// Puts an inventory item on the list under its own name and category.
    pub fn add_from_item(&self, item: &InventoryItem, owner_id: &str) -> MutationFuture<String> {
        self.add(
            NewShoppingEntry {
                text: item.name.clone(),
                quantity: Some(1),
                category: Some(item.category.clone()),
            },
            owner_id,
        )
    }

    pub fn update(&self, id: &str, patch: &ShoppingPatch) -> MutationFuture<()> {
        if let Some(text) = &patch.text {
            if text.trim().is_empty() {
                return reject(AppError::validation(
                    "TEXT_REQUIRED",
                    "Enter something to add to the list.",
                ));
            }
        }
        if patch.quantity == Some(0) {
            return reject(AppError::validation(
                "QUANTITY_INVALID",
                "Quantity must be at least 1.",
            ));
        }
        self.engine.update(id, patch)
    }

    pub fn toggle_completed(&self, id: &str) -> MutationFuture<()> {
        let Some(entry) = self.engine.local().get(id) else {
            return reject(record_not_found(ShoppingEntry::COLLECTION.as_str(), id));
        };
        self.engine.update(
            id,
            &ShoppingPatch {
                completed: Some(!entry.completed),
                ..ShoppingPatch::default()
            },
        )
    }

    /// Deletes an entry and keeps it as the single undoable deletion. A
    /// failed delete withdraws the undo offer again.
    pub fn delete(&self, id: &str) -> MutationFuture<ShoppingEntry> {
        let captured = self.engine.local().get(id).filter(|_| !is_temp_id(id));
        let pending = self.engine.delete(id);
        let Some(captured) = captured else {
            return pending;
        };

        *self.ticket() = Some(UndoTicket {
            record: captured,
            expires_at: Instant::now() + self.undo_window,
        });

        let undo = self.undo.clone();
        let id = id.to_string();
        async move {
            let result = pending.await;
            if result.is_err() {
                let mut ticket = undo.lock().unwrap_or_else(|e| e.into_inner());
                if ticket.as_ref().is_some_and(|t| t.record.id == id) {
                    *ticket = None;
                }
            }
            result
        }
        .boxed()
    }

    /// Whether an undo offer is still open.
    pub fn can_undo(&self) -> bool {
        self.ticket()
            .as_ref()
            .is_some_and(|ticket| Instant::now() < ticket.expires_at)
    }

    /// Restores the most recent deletion under its original id. The offer is
    /// consumed whether or not the restore succeeds.
    pub fn undo(&self) -> MutationFuture<()> {
        let Some(ticket) = self.ticket().take() else {
            return reject(AppError::new(
                AppError::UNDO_EMPTY_CODE,
                "There is nothing to undo.",
            ));
        };
        if Instant::now() >= ticket.expires_at {
            debug!(
                target: "larder",
                event = "undo_expired",
                id = %ticket.record.id
            );
            return reject(
                AppError::new(AppError::UNDO_EXPIRED_CODE, "It is too late to undo that.")
                    .with_context("id", ticket.record.id),
            );
        }
        self.engine.restore(ticket.record)
    }

    pub fn grouped_by_category(&self) -> Vec<(String, Vec<ShoppingEntry>)> {
        group_by(&self.entries(), |entry| entry.category.as_str())
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}
