mod util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use larder_lib::household_active::{Actor, SessionHandle, SessionState};
use larder_lib::model::InventoryItem;
use larder_lib::store::memory::MemoryStore;
use larder_lib::store::{Collection, StoreError};
use larder_lib::sync::{LocalCollection, SubscriptionManager};

use util::{ids, init_buffer_subscriber, log_lines, raw_item, signed_in, wait_until, TIMEOUT};

#[tokio::test]
async fn snapshots_replace_and_sort_local_state() -> Result<()> {
    let h = signed_in("u1").await;
    h.store
        .insert_raw(Collection::Inventory, "old", raw_item("u1", "Salt", 100));
    h.store
        .insert_raw(Collection::Inventory, "new", raw_item("u1", "Milk", 300));
    h.store
        .insert_raw(Collection::Inventory, "mid", raw_item("u1", "Eggs", 200));
    h.store
        .insert_raw(Collection::Inventory, "foreign", raw_item("h9", "Tea", 400));

    let state = wait_until(h.app.inventory.local(), |s| s.records.len() == 3).await;
    assert_eq!(ids(&state.records), ["new", "mid", "old"]);

    h.store.remove_raw(Collection::Inventory, "mid");
    let state = wait_until(h.app.inventory.local(), |s| s.records.len() == 2).await;
    assert_eq!(ids(&state.records), ["new", "old"]);
    Ok(())
}

#[tokio::test]
async fn stream_errors_keep_the_last_snapshot_and_are_logged() -> Result<()> {
    let (buffer, _guard) = init_buffer_subscriber();
    let h = signed_in("u1").await;
    h.store
        .insert_raw(Collection::Inventory, "milk", raw_item("u1", "Milk", 100));
    wait_until(h.app.inventory.local(), |s| s.records.len() == 1).await;

    h.store.inject_subscription_error(
        Collection::Inventory,
        StoreError::Unavailable("listen stream closed".into()),
    );

    let logged = tokio::time::timeout(TIMEOUT, async {
        loop {
            let found = log_lines(&buffer).into_iter().find(|line| {
                line["fields"]["event"] == "subscription_error"
            });
            if let Some(line) = found {
                return line;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(logged["level"], "ERROR");
    assert_eq!(logged["fields"]["collection"], "inventory");
    assert_eq!(logged["fields"]["household_id"], "u1");

    let state = h.app.inventory.local().state();
    assert!(state.loaded);
    assert_eq!(ids(&state.records), ["milk"]);

    // The query keeps running after the error.
    h.store
        .insert_raw(Collection::Inventory, "eggs", raw_item("u1", "Eggs", 200));
    let state = wait_until(h.app.inventory.local(), |s| s.records.len() == 2).await;
    assert_eq!(ids(&state.records), ["eggs", "milk"]);
    Ok(())
}

#[tokio::test]
async fn follow_tracks_the_session() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_raw(Collection::Inventory, "a", raw_item("h1", "Milk", 1));
    store.insert_raw(Collection::Inventory, "b", raw_item("h2", "Tea", 1));

    let manager = SubscriptionManager::new(Arc::new(store.clone()));
    let local: LocalCollection<InventoryItem> = LocalCollection::new();
    manager.register(Arc::new(local.clone()));

    let session = SessionHandle::new();
    let follower = manager.follow(session.watch());
    assert!(manager.active_household().is_none());

    let actor = Actor::new("u1");
    session.set(Some(SessionState {
        actor: actor.clone(),
        household_id: "h1".into(),
    }));
    let state = wait_until(&local, |s| s.household_id.as_deref() == Some("h1") && s.loaded).await;
    assert_eq!(ids(&state.records), ["a"]);

    session.set(Some(SessionState {
        actor,
        household_id: "h2".into(),
    }));
    let state = wait_until(&local, |s| s.household_id.as_deref() == Some("h2") && s.loaded).await;
    assert_eq!(ids(&state.records), ["b"]);

    session.clear();
    let state = wait_until(&local, |s| s.household_id.is_none()).await;
    assert!(state.records.is_empty());
    assert!(!local.wait_loaded().await);

    drop(session);
    tokio::time::timeout(TIMEOUT, follower).await??;
    Ok(())
}

#[tokio::test]
async fn late_registration_joins_the_active_household() -> Result<()> {
    let store = MemoryStore::new();
    store.insert_raw(Collection::Inventory, "a", raw_item("h1", "Milk", 1));
    let manager = SubscriptionManager::new(Arc::new(store.clone()));
    manager.activate(Some("h1"));

    let local: LocalCollection<InventoryItem> = LocalCollection::new();
    manager.register(Arc::new(local.clone()));
    let state = wait_until(&local, |s| s.loaded).await;
    assert_eq!(state.household_id.as_deref(), Some("h1"));
    assert_eq!(ids(&state.records), ["a"]);

    manager.shutdown();
    assert!(local.household_id().is_none());
    Ok(())
}

#[tokio::test]
async fn reactivating_the_same_household_keeps_state() -> Result<()> {
    let h = signed_in("u1").await;
    h.store
        .insert_raw(Collection::Inventory, "a", raw_item("u1", "Milk", 1));
    let before = wait_until(h.app.inventory.local(), |s| s.records.len() == 1).await;

    h.app.subscriptions.activate(Some("u1"));
    let after = h.app.inventory.local().state();
    assert_eq!(after.epoch, before.epoch);
    assert_eq!(after.records, before.records);
    Ok(())
}

#[tokio::test]
async fn joining_a_household_switches_every_collection() -> Result<()> {
    let h = signed_in("u1").await;
    h.store
        .insert_raw(Collection::Inventory, "mine", raw_item("u1", "Milk", 1));
    wait_until(h.app.inventory.local(), |s| s.records.len() == 1).await;

    let joined = h.app.join_household("  family-42 ").await?;
    assert_eq!(joined, "family-42");
    assert_eq!(h.app.household_id()?, "family-42");
    assert_eq!(h.app.profile().await?.household_id, "family-42");

    h.app.wait_until_loaded(TIMEOUT).await?;
    assert!(h.app.inventory.items().is_empty());
    assert_eq!(
        h.app.shopping.local().household_id().as_deref(),
        Some("family-42")
    );
    assert_eq!(
        h.app.categories.local().household_id().as_deref(),
        Some("family-42")
    );
    Ok(())
}
