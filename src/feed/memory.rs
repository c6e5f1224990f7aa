//! in-process feed: the stand-in for firebase in tests and offline demos.
//!
//! behaves like the live database: a new listener immediately receives the
//! current value of its path (null when nothing was set), every `set`
//! fans out to all listeners of that path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{FeedClient, FeedEvent, Subscription};

#[derive(Default)]
struct PathState {
    value: Option<Value>,
    listeners: Vec<(u64, mpsc::UnboundedSender<FeedEvent>)>,
}

#[derive(Clone, Default)]
pub struct MemoryFeed {
    paths: Arc<Mutex<HashMap<String, PathState>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// replace the value at `path` and notify its listeners
    pub fn set(&self, path: &str, value: Value) {
        let mut paths = self.lock();
        let state = paths.entry(path.to_string()).or_default();
        state.value = if value.is_null() { None } else { Some(value.clone()) };
        state
            .listeners
            .retain(|(_, tx)| tx.send(FeedEvent::Snapshot(value.clone())).is_ok());
    }

    /// remove the value at `path`; listeners see a null snapshot
    pub fn remove(&self, path: &str) {
        self.set(path, Value::Null);
    }

    /// report an error to every listener of `path`
    pub fn fail(&self, path: &str, cause: &str) {
        let mut paths = self.lock();
        if let Some(state) = paths.get_mut(path) {
            state
                .listeners
                .retain(|(_, tx)| tx.send(FeedEvent::Error(cause.to_string())).is_ok());
        }
    }

    /// number of live listeners on `path`
    pub fn listener_count(&self, path: &str) -> usize {
        self.lock().get(path).map_or(0, |s| s.listeners.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathState>> {
        // a poisoned map still holds consistent data; listeners are append/remove only
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FeedClient for MemoryFeed {
    fn subscribe(&self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut paths = self.lock();
            let state = paths.entry(path.to_string()).or_default();
            let initial = state.value.clone().unwrap_or(Value::Null);
            let _ = tx.send(FeedEvent::Snapshot(initial));
            state.listeners.push((id, tx));
        }

        let paths = Arc::clone(&self.paths);
        let owned_path = path.to_string();
        Subscription::new(path, rx, move || {
            let mut paths = paths.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = paths.get_mut(&owned_path) {
                state.listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }
}
