use serde::{Deserialize, Serialize};

use crate::store::Collection;
use crate::sync::{Patchable, Record};

fn default_quantity() -> u32 {
    1
}

fn default_category() -> String {
    crate::categories::FALLBACK_CATEGORY.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Low,
    Normal,
    #[default]
    Full,
}

impl StockLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            StockLevel::Low => "low",
            StockLevel::Normal => "normal",
            StockLevel::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<StockLevel> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(StockLevel::Low),
            "normal" => Some(StockLevel::Normal),
            "full" => Some(StockLevel::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub stock_level: StockLevel,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// ISO-8601 date as entered by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<String>,
    #[serde(default)]
    pub household_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Input for a new inventory item; everything but the name has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInventoryItem {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub stock_level: Option<StockLevel>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<String>,
}

impl NewInventoryItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_level: Option<StockLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<String>,
}

impl Record for InventoryItem {
    const COLLECTION: Collection = Collection::Inventory;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn household_id(&self) -> &str {
        &self.household_id
    }

    fn set_household_id(&mut self, household_id: String) {
        self.household_id = household_id;
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl Patchable for InventoryItem {
    type Patch = InventoryPatch;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingEntry {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub household_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShoppingEntry {
    pub text: String,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

impl NewShoppingEntry {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl Record for ShoppingEntry {
    const COLLECTION: Collection = Collection::ShoppingList;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn household_id(&self) -> &str {
        &self.household_id
    }

    fn set_household_id(&mut self, household_id: String) {
        self.household_id = household_id;
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl Patchable for ShoppingEntry {
    type Patch = ShoppingPatch;
}

/// A household's custom category. Built-in categories are not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub household_id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl Record for Category {
    const COLLECTION: Collection = Collection::Categories;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn household_id(&self) -> &str {
        &self.household_id
    }

    fn set_household_id(&mut self, household_id: String) {
        self.household_id = household_id;
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }
}

/// Purchase frequency counter behind the quick-add suggestions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub household_id: String,
    pub text: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub last_used: i64,
}

/// Per-actor profile stored in the `users` collection, keyed by actor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub household_id: String,
}
