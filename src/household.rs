use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::household_active::Actor;
use crate::model::Profile;
use crate::store::{Collection, RemoteStore, StoreError, HOUSEHOLD_FIELD};
use crate::{AppError, AppResult};

fn profile_from(uid: &str, mut data: Map<String, Value>) -> AppResult<Profile> {
    data.insert("uid".into(), Value::String(uid.to_string()));
    Ok(serde_json::from_value(Value::Object(data))?)
}

fn profile_data(profile: &Profile) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(profile)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::new(
            AppError::STORE_INVALID_CODE,
            "Profile did not encode to an object.",
        )),
    }
}

/// Loads the actor's profile, creating a self-owned household profile on
/// first use. A stored profile with a blank household is repaired the same
/// way.
pub async fn resolve_profile(store: &dyn RemoteStore, actor: &Actor) -> AppResult<Profile> {
    if let Some(doc) = store.get(Collection::Users, &actor.id).await? {
        let mut profile = profile_from(&actor.id, doc.data)?;
        if !profile.household_id.trim().is_empty() {
            return Ok(profile);
        }
        warn!(
            target: "larder",
            event = "profile_household_missing",
            actor_id = %actor.id
        );
        profile.household_id = actor.id.clone();
        store
            .put(Collection::Users, &actor.id, profile_data(&profile)?)
            .await?;
        return Ok(profile);
    }

    let profile = Profile {
        uid: actor.id.clone(),
        email: actor.email.clone().unwrap_or_default(),
        household_id: actor.id.clone(),
    };
    store
        .put(Collection::Users, &actor.id, profile_data(&profile)?)
        .await?;
    info!(
        target: "larder",
        event = "profile_created",
        actor_id = %actor.id,
        household_id = %profile.household_id
    );
    Ok(profile)
}

/// Repoints the actor's profile at `code`. Only the household field is
/// overwritten; nothing is copied between households and the target is
/// not checked for existence. Returns the trimmed code.
pub async fn join_household(
    store: &dyn RemoteStore,
    actor: &Actor,
    code: &str,
) -> AppResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::validation(
            "HOUSEHOLD_CODE_REQUIRED",
            "Enter a household code to join.",
        ));
    }

    let mut fields = Map::new();
    fields.insert(HOUSEHOLD_FIELD.into(), Value::String(code.to_string()));
    match store.update(Collection::Users, &actor.id, fields).await {
        Ok(()) => {}
        Err(StoreError::NotFound { .. }) => {
            let profile = Profile {
                uid: actor.id.clone(),
                email: actor.email.clone().unwrap_or_default(),
                household_id: code.to_string(),
            };
            store
                .put(Collection::Users, &actor.id, profile_data(&profile)?)
                .await?;
        }
        Err(err) => {
            let err = AppError::mutation_failed(err)
                .with_context("operation", "join_household")
                .with_context("actor_id", actor.id.as_str());
            warn!(
                target: "larder",
                event = "household_join_failed",
                actor_id = %actor.id,
                error = %err
            );
            return Err(err);
        }
    }

    info!(
        target: "larder",
        event = "household_joined",
        actor_id = %actor.id,
        household_id = %code
    );
    Ok(code.to_string())
}
