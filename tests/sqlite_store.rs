mod util;

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use larder_lib::config::Config;
use larder_lib::model::{NewInventoryItem, NewShoppingEntry, StockLevel};
use larder_lib::store::sqlite::SqliteStore;
use larder_lib::store::{Collection, RemoteStore, StoreError};
use larder_lib::{Actor, AppState};
use serde_json::json;
use tempfile::tempdir;

use util::{object, TIMEOUT};

#[tokio::test]
async fn documents_round_trip_through_sqlite() -> Result<()> {
    let store = SqliteStore::in_memory().await?;

    let id = store
        .create(
            Collection::Inventory,
            object(json!({ "name": "Milk", "householdId": "h1", "createdAt": 1 })),
        )
        .await?;
    store
        .update(Collection::Inventory, &id, object(json!({ "stockLevel": "low" })))
        .await?;

    let doc = store.get(Collection::Inventory, &id).await?.expect("stored");
    assert_eq!(doc.data.get("name"), Some(&json!("Milk")));
    assert_eq!(doc.data.get("stockLevel"), Some(&json!("low")));

    assert_eq!(store.list(Collection::Inventory, "h1").await?.len(), 1);
    assert!(store.list(Collection::Inventory, "h2").await?.is_empty());
    assert!(store.list(Collection::ShoppingList, "h1").await?.is_empty());

    store.delete(Collection::Inventory, &id).await?;
    assert!(store.get(Collection::Inventory, &id).await?.is_none());
    let err = store.delete(Collection::Inventory, &id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    let err = store
        .update(Collection::Inventory, &id, object(json!({ "x": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn increment_upserts_and_counts() -> Result<()> {
    let store = SqliteStore::in_memory().await?;
    let fields = || object(json!({ "householdId": "h1", "text": "Bananas", "lastUsed": 5 }));

    store
        .increment(Collection::History, "h1:bananas", fields(), "count", 1)
        .await?;
    store
        .increment(Collection::History, "h1:bananas", fields(), "count", 1)
        .await?;
    store
        .increment(Collection::History, "h1:bananas", fields(), "count", 3)
        .await?;

    let docs = store.list(Collection::History, "h1").await?;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].data.get("count"), Some(&json!(5)));
    assert_eq!(docs[0].data.get("text"), Some(&json!("Bananas")));
    Ok(())
}

#[tokio::test]
async fn subscriptions_see_every_write() -> Result<()> {
    let store = SqliteStore::in_memory().await?;
    let mut snapshots = store.subscribe(Collection::ShoppingList, "h1");

    let first = tokio::time::timeout(TIMEOUT, snapshots.next()).await?.expect("snapshot")?;
    assert!(first.is_empty());

    store
        .put(
            Collection::ShoppingList,
            "s1",
            object(json!({ "text": "Eggs", "householdId": "h1" })),
        )
        .await?;
    let next = tokio::time::timeout(TIMEOUT, snapshots.next()).await?.expect("snapshot")?;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, "s1");
    Ok(())
}

#[tokio::test]
async fn app_state_persists_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("larder.sqlite3");
    let actor = Actor::new("u1").with_email("u1@example.com");

    let milk = {
        let app = AppState::new(Arc::new(SqliteStore::open(&path).await?), Config::default());
        app.sign_in(actor.clone()).await?;
        app.wait_until_loaded(TIMEOUT).await?;
        let milk = app.inventory.add(NewInventoryItem::named("Milk"), "u1").await?;
        app.inventory.set_stock_level(&milk, StockLevel::Low).await?;
        app.shopping.add(NewShoppingEntry::text("Bread"), "u1").await?;
        app.history.flush().await;
        app.sign_out();
        milk
    };

    let app = AppState::new(Arc::new(SqliteStore::open(&path).await?), Config::default());
    let profile = app.sign_in(actor).await?;
    assert_eq!(profile.email, "u1@example.com");
    app.wait_until_loaded(TIMEOUT).await?;

    let items = app.inventory.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, milk);
    assert_eq!(items[0].stock_level, StockLevel::Low);
    assert_eq!(app.shopping.entries().len(), 1);
    let frequent = app.history.frequent("u1").await?;
    assert_eq!(frequent.len(), 1);
    assert_eq!(frequent[0].text, "Bread");
    Ok(())
}
