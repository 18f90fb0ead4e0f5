use tokio::sync::watch;

use crate::categories::{group_by, resolve_category};
use crate::model::{InventoryItem, InventoryPatch, NewInventoryItem, StockLevel};
use crate::sync::engine::reject;
use crate::sync::{Engine, LocalCollection, LocalState, MutationFuture};
use crate::time::now_ms;
use crate::AppError;

/// The "preload essentials" set offered for an empty pantry.
pub const ESSENTIALS: &[(&str, &str, &str)] = &[
    ("Milk", "Dairy", "Fridge"),
    ("Eggs", "Dairy", "Fridge"),
    ("Butter", "Dairy", "Fridge"),
    ("Bread", "Bakery", "Pantry"),
    ("Rice", "Pantry", "Pantry"),
    ("Pasta", "Pantry", "Pantry"),
    ("Olive Oil", "Pantry", "Pantry"),
    ("Salt", "Pantry", "Pantry"),
    ("Coffee", "Pantry", "Kitchen"),
    ("Frozen Peas", "Frozen", "Freezer"),
];

fn validate(name: &str, quantity: u32, value: f64) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::validation("NAME_REQUIRED", "Item name is required."));
    }
    if quantity == 0 {
        return Err(AppError::validation(
            "QUANTITY_INVALID",
            "Quantity must be at least 1.",
        ));
    }
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::validation(
            "VALUE_INVALID",
            "Value must be zero or more.",
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Inventory {
    engine: Engine<InventoryItem>,
    default_location: String,
}

impl Inventory {
    pub fn new(engine: Engine<InventoryItem>, default_location: impl Into<String>) -> Self {
        Self {
            engine,
            default_location: default_location.into(),
        }
    }

    pub fn local(&self) -> &LocalCollection<InventoryItem> {
        self.engine.local()
    }

    /// Current snapshot, newest first.
    pub fn items(&self) -> Vec<InventoryItem> {
        self.engine.local().records()
    }

    pub fn watch(&self) -> watch::Receiver<LocalState<InventoryItem>> {
        self.engine.local().watch()
    }

    fn build(&self, draft: NewInventoryItem, owner_id: &str) -> Result<InventoryItem, AppError> {
        let quantity = draft.quantity.unwrap_or(1);
        let value = draft.value.unwrap_or(0.0);
        validate(&draft.name, quantity, value)?;
        let name = draft.name.trim().to_string();
        let now = now_ms();
        Ok(InventoryItem {
            id: String::new(),
            category: resolve_category(draft.category.as_deref(), &name),
            location: draft
                .location
                .map(|location| location.trim().to_string())
                .filter(|location| !location.is_empty())
                .unwrap_or_else(|| self.default_location.clone()),
            name,
            quantity,
            stock_level: draft.stock_level.unwrap_or_default(),
            value,
            barcode: draft.barcode.filter(|b| !b.trim().is_empty()),
            description: draft.description.filter(|d| !d.trim().is_empty()),
            purchase_date: draft.purchase_date.filter(|d| !d.trim().is_empty()),
            household_id: String::new(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Creates an item owned by `owner_id`. Resolves to the stored id.
    pub fn add(&self, draft: NewInventoryItem, owner_id: &str) -> MutationFuture<String> {
        match self.build(draft, owner_id) {
            Ok(item) => self.engine.create(item),
            Err(err) => reject(err),
        }
    }

    pub fn update(&self, id: &str, patch: &InventoryPatch) -> MutationFuture<()> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return reject(AppError::validation("NAME_REQUIRED", "Item name is required."));
            }
        }
        if patch.quantity == Some(0) {
            return reject(AppError::validation(
                "QUANTITY_INVALID",
                "Quantity must be at least 1.",
            ));
        }
        if let Some(value) = patch.value {
            if !value.is_finite() || value < 0.0 {
                return reject(AppError::validation(
                    "VALUE_INVALID",
                    "Value must be zero or more.",
                ));
            }
        }
        self.engine.update(id, patch)
    }

    pub fn set_stock_level(&self, id: &str, level: StockLevel) -> MutationFuture<()> {
        self.engine.update(
            id,
            &InventoryPatch {
                stock_level: Some(level),
                ..InventoryPatch::default()
            },
        )
    }

    pub fn delete(&self, id: &str) -> MutationFuture<InventoryItem> {
        self.engine.delete(id)
    }

    /// Bulk-creates [`ESSENTIALS`]. Nothing appears locally until the next
    /// snapshot.
    pub fn seed_essentials(&self, owner_id: &str) -> MutationFuture<usize> {
        let now = now_ms();
        let items = ESSENTIALS
            .iter()
            .enumerate()
            .map(|(index, (name, category, location))| InventoryItem {
                id: String::new(),
                name: name.to_string(),
                category: category.to_string(),
                location: location.to_string(),
                quantity: 1,
                stock_level: StockLevel::Full,
                value: 0.0,
                barcode: None,
                description: None,
                purchase_date: None,
                household_id: String::new(),
                owner_id: owner_id.to_string(),
                // Keeps the seeded list in table order once sorted newest first.
                created_at: now - index as i64,
                updated_at: now,
            })
            .collect();
        self.engine.seed(items)
    }

    pub fn grouped_by_category(&self) -> Vec<(String, Vec<InventoryItem>)> {
        group_by(&self.items(), |item| item.category.as_str())
    }

    pub fn low_stock(&self) -> Vec<InventoryItem> {
        self.items()
            .into_iter()
            .filter(|item| item.stock_level == StockLevel::Low)
            .collect()
    }
}
