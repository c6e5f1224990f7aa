//! ==============================================================================
//! subscriber.rs - feed sessions for the single sensor and the registry
//! ==============================================================================
//!
//! purpose:
//!     turns raw feed events into normalized state. each session owns exactly
//!     one Subscription for its path and a task that drains it in order.
//!     dropping the session aborts the task, which drops the Subscription,
//!     which releases the listener.
//!
//! payload shapes on the single-sensor path:
//!     - legacy firmware:  `512`                          -> value, no smoke
//!     - current firmware: `{"value": 512, "smokeFlag": 1}`
//!       (`nilai` / `asap` accepted as aliases)
//!     decoded once into ReadingPayload; nothing past this file sees json.
//!
//! relationships:
//!     - uses: feed/mod.rs (FeedClient, Subscription)
//!     - used by: monitor.rs (SensorSession), server.rs (RegistryHandle)
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::domain::{
    ConnectionState, Reading, SensorCurrent, SensorEntry, SensorInfo, SensorRegistry,
};
use crate::feed::{FeedClient, FeedEvent};

// ==============================================================================
// payload decoding
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SmokeFlag {
    Boolean(bool),
    Numeric(f64),
}

impl SmokeFlag {
    pub fn detected(&self) -> bool {
        match self {
            SmokeFlag::Boolean(b) => *b,
            SmokeFlag::Numeric(n) => *n == 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StructuredReading {
    #[serde(default, alias = "nilai")]
    pub value: Option<f64>,
    #[serde(default, rename = "smokeFlag", alias = "asap")]
    pub smoke_flag: Option<SmokeFlag>,
}

/// the two payload formats the sensor path carries
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReadingPayload {
    LegacyNumeric(f64),
    Structured(StructuredReading),
}

impl ReadingPayload {
    /// decode a snapshot; `Ok(None)` for a null payload
    pub fn decode(raw: &Value) -> Result<Option<Self>> {
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(Self::deserialize(raw)?))
    }

    /// normalize into a Reading; partial payloads without a value yield None
    pub fn into_reading(self, at: DateTime<Utc>) -> Option<Reading> {
        let (value, smoke) = match self {
            ReadingPayload::LegacyNumeric(v) => (Some(v), false),
            ReadingPayload::Structured(s) => {
                (s.value, s.smoke_flag.map_or(false, |f| f.detected()))
            }
        };
        let value = value.filter(|v| v.is_finite())?;
        Some(Reading { value, smoke_detected: smoke, timestamp: at })
    }
}

// ==============================================================================
// single-sensor session
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    Reading(Reading),
    Connection(ConnectionState),
}

/// folds feed events into connection state and readings
#[derive(Debug, Default)]
pub struct SensorFeedTracker {
    connection: ConnectionState,
}

impl SensorFeedTracker {
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn apply(&mut self, event: FeedEvent, now: DateTime<Utc>) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        match event {
            FeedEvent::Snapshot(raw) => {
                let payload = match ReadingPayload::decode(&raw) {
                    Ok(Some(p)) => p,
                    Ok(None) => return updates,
                    Err(e) => {
                        tracing::warn!("ignoring undecodable sensor payload {}: {}", raw, e);
                        return updates;
                    }
                };
                self.set_connection(ConnectionState { connected: true, error: None }, &mut updates);
                match payload.into_reading(now) {
                    Some(reading) => updates.push(SessionUpdate::Reading(reading)),
                    None => tracing::debug!("sensor payload without a value, skipped"),
                }
            }
            FeedEvent::Error(cause) => {
                tracing::error!("sensor feed error: {}", cause);
                self.set_connection(
                    ConnectionState { connected: false, error: Some(cause) },
                    &mut updates,
                );
            }
        }
        updates
    }

    fn set_connection(&mut self, next: ConnectionState, updates: &mut Vec<SessionUpdate>) {
        if self.connection != next {
            self.connection = next.clone();
            updates.push(SessionUpdate::Connection(next));
        }
    }
}

/// live subscription to the single-sensor path
pub struct SensorSession {
    path: String,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    task: JoinHandle<()>,
}

impl SensorSession {
    pub fn spawn(client: &dyn FeedClient, path: &str) -> Self {
        let mut subscription = client.subscribe(path);
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut tracker = SensorFeedTracker::default();
            while let Some(event) = subscription.next().await {
                for update in tracker.apply(event, Utc::now()) {
                    if tx.send(update).is_err() {
                        return;
                    }
                }
            }
        });

        Self { path: path.to_string(), updates: rx, task }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// next update in arrival order; None once the feed shut down
    pub async fn next(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }
}

impl Drop for SensorSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ==============================================================================
// multi-sensor registry
// ==============================================================================

pub const DEFAULT_SELECTED_SENSOR: &str = "main";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    pub registry: SensorRegistry,
    pub selected: String,
    /// true until the first snapshot or error arrives
    pub loading: bool,
    pub connection: ConnectionState,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            registry: SensorRegistry::with_default_sensor(),
            selected: DEFAULT_SELECTED_SENSOR.to_string(),
            loading: true,
            connection: ConnectionState::default(),
        }
    }
}

impl RegistryState {
    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(raw) => {
                self.registry = decode_registry(&raw);
                self.connection = ConnectionState { connected: true, error: None };
                self.ensure_selection();
            }
            FeedEvent::Error(cause) => {
                tracing::error!("sensor registry error: {}", cause);
                self.connection = ConnectionState { connected: false, error: Some(cause) };
                if self.registry.is_empty() {
                    self.registry = SensorRegistry::with_default_sensor();
                }
                self.ensure_selection();
            }
        }
        self.loading = false;
    }

    /// select a sensor that is present in the registry
    pub fn select(&mut self, id: &str) -> Result<()> {
        if !self.registry.contains(id) {
            bail!("unknown sensor '{}'", id);
        }
        self.selected = id.to_string();
        Ok(())
    }

    pub fn selected_sensor(&self) -> Option<&SensorEntry> {
        self.registry.get(&self.selected)
    }

    pub fn sensor_count(&self) -> usize {
        self.registry.len()
    }

    fn ensure_selection(&mut self) {
        if self.registry.contains(&self.selected) {
            return;
        }
        if let Some(first) = self.registry.first_id() {
            tracing::info!("sensor '{}' no longer present, selecting '{}'", self.selected, first);
            self.selected = first.to_string();
        }
    }
}

/// decode a registry snapshot, synthesizing the default sensor when absent
pub fn decode_registry(raw: &Value) -> SensorRegistry {
    let Some(nodes) = raw.as_object().filter(|m| !m.is_empty()) else {
        return SensorRegistry::with_default_sensor();
    };

    let sensors = nodes
        .iter()
        .map(|(id, node)| {
            let mut info = node
                .get("info")
                .and_then(|v| SensorInfo::deserialize(v).ok())
                .unwrap_or_default();
            if info.name.is_empty() {
                info.name = id.clone();
            }
            let current = node
                .get("current")
                .and_then(|v| SensorCurrent::deserialize(v).ok());
            SensorEntry { id: id.clone(), info, current }
        })
        .collect();

    SensorRegistry { sensors }
}

/// shared view of the registry; cheap to clone into handlers
#[derive(Clone)]
pub struct RegistryHandle {
    state: Arc<watch::Sender<RegistryState>>,
}

impl RegistryHandle {
    pub fn snapshot(&self) -> RegistryState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RegistryState> {
        self.state.subscribe()
    }

    pub fn select(&self, id: &str) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|s| match s.select(id) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}

/// live subscription to the sensor registry path
pub struct RegistrySession {
    handle: RegistryHandle,
    task: JoinHandle<()>,
}

impl RegistrySession {
    pub fn spawn(client: &dyn FeedClient, path: &str) -> Self {
        let mut subscription = client.subscribe(path);
        let (tx, _) = watch::channel(RegistryState::default());
        let state = Arc::new(tx);
        let writer = Arc::clone(&state);

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                writer.send_modify(|s| s.apply(event));
            }
        });

        Self { handle: RegistryHandle { state }, task }
    }

    pub fn handle(&self) -> RegistryHandle {
        self.handle.clone()
    }
}

impl Drop for RegistrySession {
    fn drop(&mut self) {
        self.task.abort();
    }
}
