mod util;

use anyhow::Result;
use larder_lib::categories::BUILTIN_CATEGORIES;
use larder_lib::inventory::ESSENTIALS;
use larder_lib::model::{NewInventoryItem, StockLevel};
use larder_lib::store::Collection;
use larder_lib::ErrorKind;
use serde_json::json;

use util::{object, signed_in, wait_until};

#[tokio::test]
async fn categories_are_detected_from_item_names() -> Result<()> {
    let h = signed_in("u1").await;

    let pending = h.app.inventory.add(NewInventoryItem::named("Whole Milk"), "u1");
    assert_eq!(h.app.inventory.items()[0].category, "Dairy");
    let milk = pending.await?;

    let odd = h.app.inventory.add(NewInventoryItem::named("Xyzzy123"), "u1").await?;

    let stored = h.store.document(Collection::Inventory, &milk).unwrap();
    assert_eq!(stored.get("category"), Some(&json!("Dairy")));
    let stored = h.store.document(Collection::Inventory, &odd).unwrap();
    assert_eq!(stored.get("category"), Some(&json!("Other")));
    Ok(())
}

#[tokio::test]
async fn new_items_get_defaults() -> Result<()> {
    let h = signed_in("u1").await;
    let id = h.app.inventory.add(NewInventoryItem::named("  Rice  "), "u1").await?;

    let item = h.app.inventory.local().get(&id).unwrap();
    assert_eq!(item.name, "Rice");
    assert_eq!(item.location, "Pantry");
    assert_eq!(item.quantity, 1);
    assert_eq!(item.stock_level, StockLevel::Full);
    assert_eq!(item.value, 0.0);
    assert_eq!(item.owner_id, "u1");
    assert_eq!(item.household_id, "u1");
    assert!(item.created_at > 0);

    let explicit = NewInventoryItem {
        name: "Peas".into(),
        category: Some("Frozen".into()),
        location: Some("Freezer".into()),
        quantity: Some(2),
        ..NewInventoryItem::default()
    };
    let id = h.app.inventory.add(explicit, "u1").await?;
    let item = h.app.inventory.local().get(&id).unwrap();
    assert_eq!(item.category, "Frozen");
    assert_eq!(item.location, "Freezer");
    assert_eq!(item.quantity, 2);
    Ok(())
}

#[tokio::test]
async fn invalid_items_never_reach_local_state() -> Result<()> {
    let h = signed_in("u1").await;

    let err = h
        .app
        .inventory
        .add(NewInventoryItem::named(""), "u1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION/NAME_REQUIRED");

    let negative = NewInventoryItem {
        value: Some(-1.0),
        ..NewInventoryItem::named("Gold")
    };
    let err = h.app.inventory.add(negative, "u1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(h.app.inventory.items().is_empty());
    assert!(h.store.documents(Collection::Inventory).is_empty());
    Ok(())
}

#[tokio::test]
async fn seeding_appears_with_the_next_snapshot() -> Result<()> {
    let h = signed_in("u1").await;

    let pending = h.app.inventory.seed_essentials("u1");
    assert!(h.app.inventory.items().is_empty());
    let created = pending.await?;
    assert_eq!(created, ESSENTIALS.len());

    let state = wait_until(h.app.inventory.local(), |s| s.records.len() == ESSENTIALS.len()).await;
    let names: Vec<&str> = state.records.iter().map(|i| i.name.as_str()).collect();
    let expected: Vec<&str> = ESSENTIALS.iter().map(|(name, _, _)| *name).collect();
    assert_eq!(names, expected);
    assert!(state.records.iter().all(|i| i.household_id == "u1"));
    Ok(())
}

#[tokio::test]
async fn low_stock_and_grouping_projections() -> Result<()> {
    let h = signed_in("u1").await;
    let milk = h.app.inventory.add(NewInventoryItem::named("Milk"), "u1").await?;
    h.app.inventory.add(NewInventoryItem::named("Cheddar cheese"), "u1").await?;
    h.app.inventory.add(NewInventoryItem::named("Apples"), "u1").await?;
    wait_until(h.app.inventory.local(), |s| s.records.len() == 3).await;

    h.app.inventory.set_stock_level(&milk, StockLevel::Low).await?;
    let low = h.app.inventory.low_stock();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].id, milk);

    let groups = h.app.inventory.grouped_by_category();
    let dairy = &groups.iter().find(|(name, _)| name == "Dairy").unwrap().1;
    assert_eq!(dairy.len(), 2);
    assert!(groups.iter().any(|(name, _)| name == "Produce"));
    Ok(())
}

#[tokio::test]
async fn custom_categories_extend_the_builtins() -> Result<()> {
    let h = signed_in("u1").await;
    assert_eq!(h.app.categories.all(), BUILTIN_CATEGORIES);

    let id = h.app.categories.add(" Spices ").await?;
    let all = h.app.categories.all();
    assert_eq!(all.len(), BUILTIN_CATEGORIES.len() + 1);
    assert_eq!(all.last().map(String::as_str), Some("Spices"));

    let err = h.app.categories.add("Spices").await.unwrap_err();
    assert_eq!(err.code(), "CATEGORY/DUPLICATE");
    let err = h.app.categories.add("Dairy").await.unwrap_err();
    assert_eq!(err.code(), "CATEGORY/DUPLICATE");
    // Duplicate checks are case-sensitive.
    h.app.categories.add("dairy").await?;

    let removed = h.app.categories.remove(&id).await?;
    assert_eq!(removed.name, "Spices");
    assert!(!h.app.categories.all().contains(&"Spices".to_string()));
    assert!(h.store.document(Collection::Categories, &id).is_none());
    Ok(())
}

#[tokio::test]
async fn builtin_names_cannot_be_deleted() -> Result<()> {
    let h = signed_in("u1").await;
    h.store.insert_raw(
        Collection::Categories,
        "shadow",
        object(json!({ "name": "Dairy", "householdId": "u1", "createdAt": 1 })),
    );
    wait_until(h.app.categories.local(), |s| s.records.len() == 1).await;
    // The stored duplicate does not repeat in the effective set.
    assert_eq!(h.app.categories.all(), BUILTIN_CATEGORIES);

    let err = h.app.categories.remove("shadow").await.unwrap_err();
    assert_eq!(err.code(), "CATEGORY/BUILTIN");
    assert_eq!(h.app.categories.custom().len(), 1);

    let err = h.app.categories.remove("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}
