use std::path::Path;
use std::str::FromStr;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::feed::ChangeFeed;
use super::{
    merge_fields, Collection, Document, RemoteStore, SnapshotStream, StoreError,
    StoreResult, HOUSEHOLD_FIELD,
};
use crate::id::new_document_id;
use crate::time::now_ms;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        household_id TEXT,
        body TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (collection, id)
    )",
    "CREATE INDEX IF NOT EXISTS documents_household_idx ON documents (collection, household_id)",
];

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable("timed out acquiring a database connection".into())
            }
            sqlx::Error::PoolClosed => StoreError::Unavailable("database pool is closed".into()),
            sqlx::Error::Io(err) => StoreError::Unavailable(err.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Document store persisted in a single SQLite table. Bodies are stored as
/// JSON text; the partition key is lifted into its own indexed column so
/// household queries stay cheap.
///
/// Change notification is in-process only: live queries see writes made
/// through this handle (or its clones), not writes from other processes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A second connection would open a second, empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!(target: "larder", event = "sqlite_store_ready");
        Ok(Self {
            pool,
            feed: ChangeFeed::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn query(
        &self,
        collection: Collection,
        household_id: &str,
    ) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, body FROM documents WHERE collection = ?1 AND household_id = ?2",
        )
        .bind(collection.as_str())
        .bind(household_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }
}

fn decode_body(body: &str) -> StoreResult<Map<String, Value>> {
    serde_json::from_str(body).map_err(|err| StoreError::Invalid(err.to_string()))
}

fn encode_body(data: &Map<String, Value>) -> StoreResult<String> {
    serde_json::to_string(data).map_err(|err| StoreError::Invalid(err.to_string()))
}

fn decode_row(row: &SqliteRow) -> StoreResult<Document> {
    let id: String = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    Ok(Document::new(id, decode_body(&body)?))
}

fn household_of(data: &Map<String, Value>) -> Option<String> {
    data.get(HOUSEHOLD_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}

const UPSERT_SQL: &str = "INSERT INTO documents (collection, id, household_id, body, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (collection, id) DO UPDATE SET
        household_id = excluded.household_id,
        body = excluded.body,
        updated_at = excluded.updated_at";

/// Single-statement counter upsert so concurrent increments never lose a
/// count. `json_patch` merges the fields shallowly; the counter starts at
/// zero when absent.
const INCREMENT_SQL: &str = "INSERT INTO documents (collection, id, household_id, body, updated_at)
     VALUES (?1, ?2, ?3, json_set(?4, ?6, ?7), ?5)
     ON CONFLICT (collection, id) DO UPDATE SET
        household_id = COALESCE(excluded.household_id, documents.household_id),
        body = json_set(
            json_patch(documents.body, ?4),
            ?6,
            COALESCE(json_extract(documents.body, ?6), 0) + ?7
        ),
        updated_at = excluded.updated_at";

impl RemoteStore for SqliteStore {
    fn subscribe(&self, collection: Collection, household_id: &str) -> SnapshotStream {
        let store = self.clone();
        let household_id = household_id.to_string();
        self.feed.watch(collection, move || {
            let store = store.clone();
            let household_id = household_id.clone();
            async move { store.query(collection, &household_id).await }.boxed()
        })
    }

    fn list<'a>(
        &'a self,
        collection: Collection,
        household_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<Document>>> {
        self.query(collection, household_id).boxed()
    }

    fn get<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Document>>> {
        async move {
            let row = sqlx::query(
                "SELECT id, body FROM documents WHERE collection = ?1 AND id = ?2",
            )
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(decode_row).transpose()
        }
        .boxed()
    }

    fn create<'a>(
        &'a self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<String>> {
        async move {
            let id = new_document_id();
            sqlx::query(
                "INSERT INTO documents (collection, id, household_id, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(collection.as_str())
            .bind(&id)
            .bind(household_of(&data))
            .bind(encode_body(&data)?)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            self.feed.changed(collection);
            Ok(id)
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        data: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            sqlx::query(UPSERT_SQL)
                .bind(collection.as_str())
                .bind(id)
                .bind(household_of(&data))
                .bind(encode_body(&data)?)
                .bind(now_ms())
                .execute(&self.pool)
                .await?;
            self.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let mut tx = self.pool.begin().await?;
            let row = sqlx::query("SELECT body FROM documents WHERE collection = ?1 AND id = ?2")
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                return Err(StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                });
            };
            let body: String = row.try_get("body")?;
            let mut data = decode_body(&body)?;
            merge_fields(&mut data, fields);

            sqlx::query(
                "UPDATE documents SET household_id = ?1, body = ?2, updated_at = ?3
                 WHERE collection = ?4 AND id = ?5",
            )
            .bind(household_of(&data))
            .bind(encode_body(&data)?)
            .bind(now_ms())
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            self.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let res = sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
                .bind(collection.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                });
            }
            self.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }

    fn increment<'a>(
        &'a self,
        collection: Collection,
        id: &'a str,
        fields: Map<String, Value>,
        counter: &'a str,
        by: i64,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            sqlx::query(INCREMENT_SQL)
                .bind(collection.as_str())
                .bind(id)
                .bind(household_of(&fields))
                .bind(encode_body(&fields)?)
                .bind(now_ms())
                .bind(format!("$.\"{counter}\""))
                .bind(by)
                .execute(&self.pool)
                .await?;
            self.feed.changed(collection);
            Ok(())
        }
        .boxed()
    }
}
