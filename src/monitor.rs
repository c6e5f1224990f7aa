//! ==============================================================================
//! monitor.rs - reading pipeline
//! ==============================================================================
//! ```text
//!
//! purpose:
//!     the loop that turns session updates into dashboard state:
//!
//!         SensorSession -> classify -> history -> DashboardState -> notifier
//!
//!     one task, updates handled strictly in arrival order. settings are read
//!     as a snapshot per reading, so a save takes effect on the next one.
//!     webhook posts run on their own tasks; their results come back into the
//!     same loop and only touch the notification counters.
//!
//! shared state:
//!     DashboardState sits behind Arc<RwLock<>>; the monitor is its only
//!     writer, the web server reads it. status is never stored, the api
//!     derives it from the reading and the current thresholds.
//!
//! ```
//! ==============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::classifier::classify;
use crate::domain::{ConnectionState, HistoryPoint, Reading};
use crate::history::HistoryBuffer;
use crate::notifier::{Delivery, NotificationDispatcher, WebhookSink};
use crate::settings::SettingsStore;
use crate::subscriber::{SensorSession, SessionUpdate};

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    /// last reading received; kept through feed errors
    pub reading: Option<Reading>,
    pub connection: ConnectionState,
    pub history: Vec<HistoryPoint>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub notifications_sent: u64,
}

pub type SharedDashboard = Arc<RwLock<DashboardState>>;

pub struct Monitor<W> {
    settings: Arc<RwLock<SettingsStore>>,
    dashboard: SharedDashboard,
    history: HistoryBuffer,
    dispatcher: Option<NotificationDispatcher<W>>,
    show_sensor_data: bool,
}

impl<W: WebhookSink> Monitor<W> {
    /// `dispatcher` is None when no webhook is configured
    pub fn new(
        settings: Arc<RwLock<SettingsStore>>,
        dashboard: SharedDashboard,
        history: HistoryBuffer,
        dispatcher: Option<NotificationDispatcher<W>>,
    ) -> Self {
        Self { settings, dashboard, history, dispatcher, show_sensor_data: false }
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    /// drain the session until its feed shuts down
    ///
    /// webhook results are folded into the same loop as they arrive.
    pub async fn run(mut self, mut session: SensorSession) {
        tracing::info!(path = session.path(), "monitor started");
        loop {
            tokio::select! {
                update = session.next() => match update {
                    Some(update) => self.handle(update).await,
                    None => break,
                },
                Some(delivery) = next_delivery(&mut self.dispatcher) => {
                    self.record_delivery(delivery).await;
                }
            }
        }
        tracing::warn!(path = session.path(), "sensor session ended");
    }

    pub async fn handle(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Connection(connection) => {
                if connection.connected {
                    tracing::info!("sensor feed connected");
                }
                self.dashboard.write().await.connection = connection;
            }
            SessionUpdate::Reading(reading) => self.handle_reading(reading).await,
        }
    }

    async fn handle_reading(&mut self, reading: Reading) {
        let settings = self.settings.read().await.current().clone();
        let status = classify(reading.value, &settings.thresholds);

        if self.show_sensor_data {
            tracing::info!(
                "[GAS] {:.0} ppm | {} | smoke: {}",
                reading.value,
                status.label(),
                if reading.smoke_detected { "DETECTED" } else { "clear" }
            );
        }

        self.history.append_reading(&reading);
        {
            let mut state = self.dashboard.write().await;
            state.last_update = Some(reading.timestamp);
            state.reading = Some(reading.clone());
            state.history = self.history.snapshot();
        }

        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.apply_policy(&settings.notifications);
            dispatcher.evaluate(reading.value, status, reading.smoke_detected, reading.timestamp);
        }
    }

    async fn record_delivery(&mut self, delivery: Delivery) {
        if !delivery.is_sent() {
            return;
        }
        let mut state = self.dashboard.write().await;
        state.last_notification_at = Some(delivery.at);
        state.notifications_sent += 1;
    }

    /// wait for the outstanding webhook delivery and publish its result
    #[cfg(test)]
    async fn settle_delivery(&mut self) {
        if let Some(delivery) = next_delivery(&mut self.dispatcher).await {
            self.record_delivery(delivery).await;
        }
    }
}

/// next finished delivery; pends forever when alerts are disabled
async fn next_delivery<W: WebhookSink>(
    dispatcher: &mut Option<NotificationDispatcher<W>>,
) -> Option<Delivery> {
    match dispatcher {
        Some(d) => d.next_delivery().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThresholdConfig;
    use crate::feed::MemoryFeed;
    use crate::notifier::testing::{RecordingSink, StalledSink};
    use crate::settings::SettingsPatch;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;
    use std::time::Duration;

    fn reading(value: f64, smoke: bool, secs: i64) -> Reading {
        Reading {
            value,
            smoke_detected: smoke,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    type Fixture<W> = (Monitor<W>, W, SharedDashboard, Arc<RwLock<SettingsStore>>);

    fn fixture_with<W: WebhookSink + Clone>(dir: &tempfile::TempDir, sink: W) -> Fixture<W> {
        let settings = Arc::new(RwLock::new(SettingsStore::open(dir.path().join("s.json"))));
        let dashboard = SharedDashboard::default();
        let utc = FixedOffset::east_opt(0).unwrap();
        let dispatcher = NotificationDispatcher::new(sink.clone(), utc);
        let monitor = Monitor::new(
            settings.clone(),
            dashboard.clone(),
            HistoryBuffer::new(20),
            Some(dispatcher),
        );
        (monitor, sink, dashboard, settings)
    }

    fn fixture(dir: &tempfile::TempDir) -> Fixture<RecordingSink> {
        fixture_with(dir, RecordingSink::default())
    }

    #[tokio::test]
    async fn readings_flow_into_history_and_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, sink, dashboard, _) = fixture(&dir);

        for (i, v) in [250.0, 550.0, 900.0].into_iter().enumerate() {
            monitor.handle(SessionUpdate::Reading(reading(v, false, i as i64))).await;
        }
        monitor.settle_delivery().await;

        let state = dashboard.read().await;
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.reading.as_ref().unwrap().value, 900.0);
        assert_eq!(state.notifications_sent, 1);
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.sent.lock().unwrap()[0].gas_value, 900.0);
    }

    #[tokio::test]
    async fn feed_error_keeps_last_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, _, dashboard, _) = fixture(&dir);
        monitor.handle(SessionUpdate::Reading(reading(420.0, false, 0))).await;
        monitor
            .handle(SessionUpdate::Connection(ConnectionState {
                connected: false,
                error: Some("network down".into()),
            }))
            .await;

        let state = dashboard.read().await;
        assert_eq!(state.reading.as_ref().unwrap().value, 420.0);
        assert!(!state.connection.connected);
        assert_eq!(state.connection.error.as_deref(), Some("network down"));
    }

    #[tokio::test]
    async fn saved_thresholds_apply_to_next_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, sink, _, settings) = fixture(&dir);

        monitor.handle(SessionUpdate::Reading(reading(500.0, false, 0))).await;
        assert_eq!(sink.count(), 0);

        settings
            .write()
            .await
            .save(SettingsPatch {
                thresholds: Some(ThresholdConfig { safe_max: 100.0, warning_max: 400.0 }),
                ..Default::default()
            })
            .unwrap();
        monitor.handle(SessionUpdate::Reading(reading(500.0, false, 1))).await;
        monitor.settle_delivery().await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn stalled_webhook_does_not_hold_up_readings() {
        let dir = tempfile::tempdir().unwrap();
        let (mut monitor, sink, dashboard, _) = fixture_with(&dir, StalledSink::default());

        let handled = tokio::time::timeout(Duration::from_millis(500), async {
            monitor.handle(SessionUpdate::Reading(reading(900.0, false, 0))).await;
            monitor.handle(SessionUpdate::Reading(reading(950.0, true, 300))).await;
        })
        .await;
        assert!(handled.is_ok());

        {
            let state = dashboard.read().await;
            assert_eq!(state.reading.as_ref().unwrap().value, 950.0);
            assert_eq!(state.history.len(), 2);
            assert_eq!(state.notifications_sent, 0);
        }

        // the second danger reading waits for the first post instead of adding another
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn live_loop_publishes_delivery_results() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, sink, dashboard, _) = fixture(&dir);
        let feed = MemoryFeed::new();
        let session = SensorSession::spawn(&feed, "sensor_gas");
        let task = tokio::spawn(monitor.run(session));

        feed.set("sensor_gas", json!({"value": 910, "smokeFlag": 1}));

        let mut sent = 0;
        for _ in 0..200 {
            sent = dashboard.read().await.notifications_sent;
            if sent == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sent, 1);
        assert_eq!(sink.count(), 1);
        assert!(dashboard.read().await.last_notification_at.is_some());
        task.abort();
    }

    #[tokio::test]
    async fn runs_against_a_live_session() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _, dashboard, _) = fixture(&dir);
        let feed = MemoryFeed::new();
        let session = SensorSession::spawn(&feed, "sensor_gas");
        let task = tokio::spawn(monitor.run(session));

        for v in [100, 200, 300] {
            feed.set("sensor_gas", json!({"value": v, "smokeFlag": 0}));
        }

        let mut seen = 0;
        for _ in 0..200 {
            seen = dashboard.read().await.history.len();
            if seen == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen, 3);
        assert!(dashboard.read().await.connection.connected);
        task.abort();
    }
}
