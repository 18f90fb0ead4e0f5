#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

use larder_lib::config::Config;
use larder_lib::store::memory::MemoryStore;
use larder_lib::sync::{LocalCollection, LocalState, Record};
use larder_lib::{Actor, AppState};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub store: MemoryStore,
    pub app: AppState,
    pub actor: Actor,
}

pub async fn signed_in(user: &str) -> Harness {
    signed_in_with(user, Config::default()).await
}

pub async fn signed_in_with(user: &str, config: Config) -> Harness {
    let store = MemoryStore::new();
    let app = AppState::new(Arc::new(store.clone()), config);
    let actor = Actor::new(user);
    app.sign_in(actor.clone()).await.expect("sign in");
    app.wait_until_loaded(TIMEOUT).await.expect("initial snapshots");
    Harness { store, app, actor }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

pub fn raw_item(household_id: &str, name: &str, created_at: i64) -> Map<String, Value> {
    object(json!({
        "name": name,
        "category": "Other",
        "location": "Pantry",
        "quantity": 1,
        "stockLevel": "full",
        "value": 0.0,
        "householdId": household_id,
        "ownerId": "someone",
        "createdAt": created_at,
        "updatedAt": created_at,
    }))
}

/// Waits until the local collection satisfies `pred`, returning that state.
pub async fn wait_until<R: Record>(
    local: &LocalCollection<R>,
    mut pred: impl FnMut(&LocalState<R>) -> bool,
) -> LocalState<R> {
    let mut rx = local.watch();
    let state = tokio::time::timeout(TIMEOUT, rx.wait_for(|state| pred(state)))
        .await
        .expect("timed out waiting for local state")
        .expect("local state dropped");
    LocalState::clone(&state)
}

pub fn ids<R: Record>(records: &[R]) -> Vec<String> {
    records.iter().map(|r| r.id().to_string()).collect()
}

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Thread-local JSON subscriber capturing `larder` events. Pair with a
/// current-thread runtime so spawned tasks log into the same buffer.
pub fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("larder=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn logs_to_string(buffer: &Arc<StdMutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8")
}

pub fn log_lines(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<Value> {
    logs_to_string(buffer)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
