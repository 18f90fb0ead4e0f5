use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use super::local::{LocalCollection, PendingChange};
use super::{encode, merge, patch_fields, Patchable, Record};
use crate::id::{is_temp_id, new_temp_id};
use crate::mutation_log::MutationScope;
use crate::store::RemoteStore;
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// Remote half of a mutation. By the time a caller holds one, the local half
/// has already been applied.
pub type MutationFuture<T> = BoxFuture<'static, AppResult<T>>;

pub(crate) fn reject<T: Send + 'static>(err: AppError) -> MutationFuture<T> {
    future::ready(Err(err)).boxed()
}

/// Writes addressed to a record whose create has not been confirmed yet.
pub(crate) fn record_pending(collection: &str, id: &str) -> AppError {
    AppError::new(
        AppError::RECORD_PENDING_CODE,
        "This item is still being saved. Try again in a moment.",
    )
    .with_context("collection", collection)
    .with_context("id", id)
}

pub(crate) fn record_not_found(collection: &str, id: &str) -> AppError {
    AppError::new(AppError::RECORD_NOT_FOUND_CODE, "This item no longer exists.")
        .with_context("collection", collection)
        .with_context("id", id)
}

/// Optimistic create/update/delete over one collection.
///
/// Every entry point captures the active household and epoch by value,
/// stages its change in local state synchronously, and returns the remote
/// write as a future. Staged changes stay visible across snapshots until the
/// write settles. If the remote rejects, the change is dropped before the
/// error is returned. If the household changed while the write was in
/// flight, the result is only logged.
pub struct Engine<R> {
    store: Arc<dyn RemoteStore>,
    local: LocalCollection<R>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            local: self.local.clone(),
        }
    }
}

impl<R: Record> Engine<R> {
    pub fn new(store: Arc<dyn RemoteStore>, local: LocalCollection<R>) -> Self {
        Self { store, local }
    }

    pub fn local(&self) -> &LocalCollection<R> {
        &self.local
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn failed(
        scope: &MutationScope,
        op: &str,
        id: &str,
        household_id: &str,
        err: AppError,
    ) -> AppError {
        let err = err.with_contexts([
            ("operation", op),
            ("collection", R::COLLECTION.as_str()),
            ("id", id),
            ("household_id", household_id),
        ]);
        scope.fail(&err);
        err
    }

    /// Inserts `record` at the front of local state under a temporary id and
    /// creates it remotely. Resolves to the store-assigned id.
    pub fn create(&self, mut record: R) -> MutationFuture<String> {
        let Some((household_id, epoch)) = self.local.partition() else {
            let err = AppError::household_required();
            MutationScope::new("create", R::COLLECTION, None).fail(&err);
            return reject(err);
        };
        let scope = MutationScope::new("create", R::COLLECTION, Some(&household_id));

        let temp_id = new_temp_id();
        record.set_id(temp_id.clone());
        record.set_household_id(household_id.clone());
        let data = match encode(&record) {
            Ok(data) => data,
            Err(err) => {
                return reject(Self::failed(&scope, "create", &temp_id, &household_id, err))
            }
        };

        // Lists are newest first, so a fresh record belongs at the front.
        let seq = self
            .local
            .stage(epoch, &temp_id, PendingChange::Create(record));

        let store = self.store.clone();
        let local = self.local.clone();
        async move {
            let result = store.create(R::COLLECTION, data).await;
            let current = match (seq, &result) {
                (Some(seq), Ok(id)) => local.confirm(epoch, seq, Some(id.as_str())),
                (Some(seq), Err(_)) => local.revert(epoch, seq),
                (None, _) => false,
            };
            match result {
                Ok(id) => {
                    if current {
                        scope.success(Some(&id));
                    } else {
                        scope.discarded(Some(&id));
                    }
                    Ok(id)
                }
                Err(err) => {
                    if !current {
                        scope.discarded(Some(&temp_id));
                    }
                    Err(Self::failed(
                        &scope,
                        "create",
                        &temp_id,
                        &household_id,
                        AppError::mutation_failed(err),
                    ))
                }
            }
        }
        .boxed()
    }

    /// Removes the record from local state and deletes it remotely. On
    /// failure the record shows again at its sorted position. Resolves to
    /// the removed record.
    pub fn delete(&self, id: &str) -> MutationFuture<R> {
        let Some((household_id, epoch)) = self.local.partition() else {
            let err = AppError::household_required();
            MutationScope::new("delete", R::COLLECTION, None).fail(&err);
            return reject(err);
        };
        let scope = MutationScope::new("delete", R::COLLECTION, Some(&household_id));

        if is_temp_id(id) {
            let err = record_pending(R::COLLECTION.as_str(), id);
            return reject(Self::failed(&scope, "delete", id, &household_id, err));
        }
        let Some(removed) = self.local.get(id) else {
            let err = record_not_found(R::COLLECTION.as_str(), id);
            return reject(Self::failed(&scope, "delete", id, &household_id, err));
        };
        let seq = self.local.stage(epoch, id, PendingChange::Remove);

        let store = self.store.clone();
        let local = self.local.clone();
        let id = id.to_string();
        async move {
            let result = store.delete(R::COLLECTION, &id).await;
            let current = settle(&local, epoch, seq, result.is_ok());
            match result {
                Ok(()) => {
                    if current {
                        scope.success(Some(&id));
                    } else {
                        scope.discarded(Some(&id));
                    }
                    Ok(removed)
                }
                Err(err) => {
                    if !current {
                        scope.discarded(Some(&id));
                    }
                    Err(Self::failed(
                        &scope,
                        "delete",
                        &id,
                        &household_id,
                        AppError::mutation_failed(err),
                    ))
                }
            }
        }
        .boxed()
    }

    /// Writes `record` back under its own id: the inverse of [`Engine::delete`].
    /// The record reappears locally at its sorted position right away and is
    /// removed again if the remote write fails.
    pub fn restore(&self, record: R) -> MutationFuture<()> {
        let Some((household_id, epoch)) = self.local.partition() else {
            let err = AppError::household_required();
            MutationScope::new("restore", R::COLLECTION, None).fail(&err);
            return reject(err);
        };
        let scope = MutationScope::new("restore", R::COLLECTION, Some(&household_id));
        let id = record.id().to_string();

        if record.household_id() != household_id {
            let err = AppError::new(
                "HOUSEHOLD/MISMATCH",
                "This item belongs to a different household.",
            )
            .with_context("record_household_id", record.household_id());
            return reject(Self::failed(&scope, "restore", &id, &household_id, err));
        }
        let data = match encode(&record) {
            Ok(data) => data,
            Err(err) => return reject(Self::failed(&scope, "restore", &id, &household_id, err)),
        };
        let seq = self.local.stage(epoch, &id, PendingChange::Restore(record));

        let store = self.store.clone();
        let local = self.local.clone();
        async move {
            let result = store.put(R::COLLECTION, &id, data).await;
            let current = settle(&local, epoch, seq, result.is_ok());
            match result {
                Ok(()) => {
                    if current {
                        scope.success(Some(&id));
                    } else {
                        scope.discarded(Some(&id));
                    }
                    Ok(())
                }
                Err(err) => {
                    if !current {
                        scope.discarded(Some(&id));
                    }
                    Err(Self::failed(
                        &scope,
                        "restore",
                        &id,
                        &household_id,
                        AppError::mutation_failed(err),
                    ))
                }
            }
        }
        .boxed()
    }

    /// Bulk create without optimistic insertion: every record is sent
    /// concurrently and the next snapshot shows the outcome. Resolves to the
    /// number of records created, or the first failure if any write failed.
    pub fn seed(&self, records: Vec<R>) -> MutationFuture<usize> {
        let Some((household_id, _)) = self.local.partition() else {
            let err = AppError::household_required();
            MutationScope::new("seed", R::COLLECTION, None).fail(&err);
            return reject(err);
        };
        let scope = MutationScope::new("seed", R::COLLECTION, Some(&household_id));

        let mut payloads = Vec::with_capacity(records.len());
        for mut record in records {
            record.set_household_id(household_id.clone());
            match encode(&record) {
                Ok(data) => payloads.push(data),
                Err(err) => return reject(Self::failed(&scope, "seed", "", &household_id, err)),
            }
        }

        let store = self.store.clone();
        async move {
            let results =
                future::join_all(payloads.into_iter().map(|data| store.create(R::COLLECTION, data)))
                    .await;
            let total = results.len();
            let mut created = 0;
            let mut first_err = None;
            for result in results {
                match result {
                    Ok(_) => created += 1,
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            match first_err {
                None => {
                    scope.success(None);
                    Ok(created)
                }
                Some(err) => Err(Self::failed(
                    &scope,
                    "seed",
                    "",
                    &household_id,
                    AppError::mutation_failed(err)
                        .with_context("created", created.to_string())
                        .with_context("requested", total.to_string()),
                )),
            }
        }
        .boxed()
    }
}

impl<R: Patchable> Engine<R> {
    /// Merges `patch` into the local record and updates it remotely. On
    /// failure the record shows the last known store state again, which is
    /// the pre-mutation record unless a snapshot has brought a newer one.
    pub fn update(&self, id: &str, patch: &R::Patch) -> MutationFuture<()> {
        let Some((household_id, epoch)) = self.local.partition() else {
            let err = AppError::household_required();
            MutationScope::new("update", R::COLLECTION, None).fail(&err);
            return reject(err);
        };
        let scope = MutationScope::new("update", R::COLLECTION, Some(&household_id));

        if is_temp_id(id) {
            let err = record_pending(R::COLLECTION.as_str(), id);
            return reject(Self::failed(&scope, "update", id, &household_id, err));
        }
        let mut fields = match patch_fields(patch) {
            Ok(fields) => fields,
            Err(err) => return reject(Self::failed(&scope, "update", id, &household_id, err)),
        };
        if fields.is_empty() {
            scope.success(Some(id));
            return future::ready(Ok(())).boxed();
        }
        R::stamp(&mut fields, now_ms());

        let Some(before) = self.local.get(id) else {
            let err = record_not_found(R::COLLECTION.as_str(), id);
            return reject(Self::failed(&scope, "update", id, &household_id, err));
        };
        if let Err(err) = merge(&before, &fields) {
            return reject(Self::failed(&scope, "update", id, &household_id, err));
        }
        let seq = self
            .local
            .stage(epoch, id, PendingChange::Patch(fields.clone()));

        let store = self.store.clone();
        let local = self.local.clone();
        let id = id.to_string();
        async move {
            let result = store.update(R::COLLECTION, &id, fields).await;
            let current = settle(&local, epoch, seq, result.is_ok());
            match result {
                Ok(()) => {
                    if current {
                        scope.success(Some(&id));
                    } else {
                        scope.discarded(Some(&id));
                    }
                    Ok(())
                }
                Err(err) => {
                    if !current {
                        scope.discarded(Some(&id));
                    }
                    Err(Self::failed(
                        &scope,
                        "update",
                        &id,
                        &household_id,
                        AppError::mutation_failed(err),
                    ))
                }
            }
        }
        .boxed()
    }
}

/// Confirms or reverts a staged write. Returns `false` when the write no
/// longer belongs to the current partition.
fn settle<R: Record>(local: &LocalCollection<R>, epoch: u64, seq: Option<u64>, ok: bool) -> bool {
    match seq {
        Some(seq) if ok => local.confirm(epoch, seq, None),
        Some(seq) => local.revert(epoch, seq),
        None => false,
    }
}
