use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::info;

use crate::AppResult;

/// The signed-in principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub email: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Source of the current actor. Sign-in flows live behind this seam.
pub trait IdentityProvider: Send + Sync {
    fn current_actor(&self) -> BoxFuture<'_, AppResult<Actor>>;
}

/// Always answers with the same actor. Used by the CLI and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Actor);

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> BoxFuture<'_, AppResult<Actor>> {
        future::ready(Ok(self.0.clone())).boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub actor: Actor,
    pub household_id: String,
}

/// Shared view of who is signed in and which household they work in.
/// `None` means signed out or not yet joined to a household.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Option<SessionState>>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<SessionState> {
        self.tx.borrow().clone()
    }

    pub fn actor(&self) -> Option<Actor> {
        self.tx.borrow().as_ref().map(|state| state.actor.clone())
    }

    pub fn household_id(&self) -> Option<String> {
        self.tx
            .borrow()
            .as_ref()
            .map(|state| state.household_id.clone())
    }

    pub fn watch(&self) -> watch::Receiver<Option<SessionState>> {
        self.tx.subscribe()
    }

    /// Replaces the session. Watchers are only notified when the value
    /// actually changes.
    pub fn set(&self, next: Option<SessionState>) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            info!(
                target: "larder",
                event = "active_household_changed",
                actor_id = next.as_ref().map(|state| state.actor.id.as_str()),
                household_id = next.as_ref().map(|state| state.household_id.as_str())
            );
        }
    }

    pub fn clear(&self) {
        self.set(None);
    }
}
