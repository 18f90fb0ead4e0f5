use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::categories::Categories;
use crate::config::Config;
use crate::history::History;
use crate::household::{join_household, resolve_profile};
use crate::household_active::{Actor, IdentityProvider, SessionHandle, SessionState};
use crate::inventory::Inventory;
use crate::model::Profile;
use crate::shopping::ShoppingList;
use crate::store::RemoteStore;
use crate::sync::{Engine, LocalCollection, SubscriptionManager};
use crate::{AppError, AppResult};

/// Everything a UI collaborator talks to: the session, the three synced
/// collections and the purchase history, over one remote store.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RemoteStore>,
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub subscriptions: SubscriptionManager,
    pub inventory: Inventory,
    pub shopping: ShoppingList,
    pub categories: Categories,
    pub history: History,
}

impl AppState {
    pub fn new(store: Arc<dyn RemoteStore>, config: Config) -> Self {
        let subscriptions = SubscriptionManager::new(store.clone());

        let inventory_local = LocalCollection::new();
        let shopping_local = LocalCollection::new();
        let categories_local = LocalCollection::new();
        subscriptions.register(Arc::new(inventory_local.clone()));
        subscriptions.register(Arc::new(shopping_local.clone()));
        subscriptions.register(Arc::new(categories_local.clone()));

        let history = History::new(store.clone(), config.history_limit);
        let inventory = Inventory::new(
            Engine::new(store.clone(), inventory_local),
            config.default_location.clone(),
        );
        let shopping = ShoppingList::new(
            Engine::new(store.clone(), shopping_local),
            history.clone(),
            config.undo_window(),
        );
        let categories = Categories::new(Engine::new(store.clone(), categories_local));

        Self {
            store,
            config: Arc::new(config),
            session: SessionHandle::new(),
            subscriptions,
            inventory,
            shopping,
            categories,
            history,
        }
    }

    pub fn actor(&self) -> AppResult<Actor> {
        self.session
            .actor()
            .ok_or_else(|| AppError::new(AppError::SIGNED_OUT_CODE, "Sign in to continue."))
    }

    pub fn household_id(&self) -> AppResult<String> {
        self.session
            .household_id()
            .ok_or_else(AppError::household_required)
    }

    fn enter(&self, actor: Actor, household_id: String) {
        self.subscriptions.activate(Some(&household_id));
        self.session.set(Some(SessionState {
            actor,
            household_id,
        }));
    }

    /// Resolves the actor's profile (creating it on first use) and starts
    /// live queries for their household.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn sign_in(&self, actor: Actor) -> AppResult<Profile> {
        let profile = resolve_profile(self.store.as_ref(), &actor).await?;
        info!(
            target: "larder",
            event = "signed_in",
            actor_id = %actor.id,
            household_id = %profile.household_id
        );
        self.enter(actor, profile.household_id.clone());
        Ok(profile)
    }

    pub async fn sign_in_with(&self, identity: &dyn IdentityProvider) -> AppResult<Profile> {
        let actor = identity.current_actor().await?;
        self.sign_in(actor).await
    }

    /// Tears down live queries and clears all local state. Remote records
    /// are untouched.
    pub fn sign_out(&self) {
        let actor_id = self.session.actor().map(|actor| actor.id);
        self.subscriptions.shutdown();
        self.session.clear();
        info!(target: "larder", event = "signed_out", actor_id = actor_id.as_deref());
    }

    /// Repoints the signed-in actor at household `code` and switches every
    /// collection over to it.
    pub async fn join_household(&self, code: &str) -> AppResult<String> {
        let actor = self.actor()?;
        let household_id = join_household(self.store.as_ref(), &actor, code).await?;
        self.enter(actor, household_id.clone());
        Ok(household_id)
    }

    /// The stored profile of the signed-in actor.
    pub async fn profile(&self) -> AppResult<Profile> {
        let actor = self.actor()?;
        resolve_profile(self.store.as_ref(), &actor).await
    }

    /// Waits until every collection has its first snapshot for the active
    /// household.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> AppResult<()> {
        let all = async {
            let (inventory, shopping, categories) = tokio::join!(
                self.inventory.local().wait_loaded(),
                self.shopping.local().wait_loaded(),
                self.categories.local().wait_loaded(),
            );
            inventory && shopping && categories
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::household_required()),
            Err(_) => Err(AppError::new(
                AppError::UNAVAILABLE_CODE,
                "Timed out waiting for data.",
            )
            .with_context("timeout_ms", timeout.as_millis().to_string())),
        }
    }
}
