use crate::model::Category;
use crate::sync::engine::{record_not_found, reject};
use crate::sync::{Engine, LocalCollection, MutationFuture, Record};
use crate::time::now_ms;
use crate::AppError;

/// Category assigned when nothing else matches.
pub const FALLBACK_CATEGORY: &str = "Other";

/// Always present and never deletable.
pub const BUILTIN_CATEGORIES: &[&str] = &[
    "Produce",
    "Dairy",
    "Bakery",
    "Meat",
    "Frozen",
    "Pantry",
    "Beverages",
    "Snacks",
    "Household",
    FALLBACK_CATEGORY,
];

pub const DEFAULT_LOCATIONS: &[&str] = &["Kitchen", "Pantry", "Fridge", "Freezer"];

/// Keyword → category. Checked in order against the lowercased item name;
/// the first keyword contained in the name wins.
pub const AUTO_CATEGORIES: &[(&str, &str)] = &[
    ("milk", "Dairy"),
    ("cheese", "Dairy"),
    ("yogurt", "Dairy"),
    ("butter", "Dairy"),
    ("egg", "Dairy"),
    ("eggs", "Dairy"),
    ("bread", "Bakery"),
    ("bagel", "Bakery"),
    ("sugar", "Bakery"),
    ("flour", "Bakery"),
    ("apple", "Produce"),
    ("banana", "Produce"),
    ("lettuce", "Produce"),
    ("tomato", "Produce"),
    ("onion", "Produce"),
    ("potato", "Produce"),
    ("chicken", "Meat"),
    ("beef", "Meat"),
    ("steak", "Meat"),
    ("water", "Beverages"),
    ("juice", "Beverages"),
    ("soda", "Beverages"),
    ("coffee", "Pantry"),
    ("tea", "Pantry"),
    ("rice", "Pantry"),
    ("pasta", "Pantry"),
    ("oil", "Pantry"),
    ("salt", "Pantry"),
    ("pepper", "Pantry"),
];

pub fn detect_category(name: &str) -> &'static str {
    let name = name.to_lowercase();
    AUTO_CATEGORIES
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Uses `explicit` when it has content, otherwise detects from `name`.
pub fn resolve_category(explicit: Option<&str>, name: &str) -> String {
    explicit
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| detect_category(name).to_string())
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_CATEGORIES.contains(&name)
}

/// Built-ins first, then custom names in their local order, without repeats.
pub fn effective_categories(custom: &[Category]) -> Vec<String> {
    let mut all: Vec<String> = BUILTIN_CATEGORIES.iter().map(|c| c.to_string()).collect();
    for category in custom {
        if !all.iter().any(|existing| existing == &category.name) {
            all.push(category.name.clone());
        }
    }
    all
}

/// Groups `items` by category, keeping groups in order of first appearance
/// and items in their list order.
pub fn group_by<T: Clone>(items: &[T], category: impl Fn(&T) -> &str) -> Vec<(String, Vec<T>)> {
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    for item in items {
        let name = match category(item) {
            "" => FALLBACK_CATEGORY,
            name => name,
        };
        match groups.iter_mut().find(|(group, _)| group == name) {
            Some((_, members)) => members.push(item.clone()),
            None => groups.push((name.to_string(), vec![item.clone()])),
        }
    }
    groups
}

/// A household's category set: the built-ins plus its custom categories.
#[derive(Clone)]
pub struct Categories {
    engine: Engine<Category>,
}

impl Categories {
    pub fn new(engine: Engine<Category>) -> Self {
        Self { engine }
    }

    pub fn local(&self) -> &LocalCollection<Category> {
        self.engine.local()
    }

    pub fn custom(&self) -> Vec<Category> {
        self.engine.local().records()
    }

    /// The category names offered to the rest of the app.
    pub fn all(&self) -> Vec<String> {
        effective_categories(&self.custom())
    }

    /// Duplicate names are rejected, compared case-sensitively against
    /// built-ins and existing custom categories.
    pub fn add(&self, name: &str) -> MutationFuture<String> {
        let name = name.trim();
        if name.is_empty() {
            return reject(AppError::validation(
                "CATEGORY_NAME_REQUIRED",
                "Category name is required.",
            ));
        }
        if is_builtin(name) || self.custom().iter().any(|c| c.name == name) {
            return reject(
                AppError::new("CATEGORY/DUPLICATE", "Category already exists.")
                    .with_context("name", name),
            );
        }
        let now = now_ms();
        self.engine.create(Category {
            id: String::new(),
            name: name.to_string(),
            household_id: String::new(),
            created_at: now,
        })
    }

    pub fn remove(&self, id: &str) -> MutationFuture<Category> {
        let Some(category) = self.engine.local().get(id) else {
            return reject(record_not_found(Category::COLLECTION.as_str(), id));
        };
        if is_builtin(&category.name) {
            return reject(
                AppError::new("CATEGORY/BUILTIN", "Built-in categories cannot be deleted.")
                    .with_context("name", category.name),
            );
        }
        self.engine.delete(id)
    }
}
