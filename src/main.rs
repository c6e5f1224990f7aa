//! ==============================================================================
//! main.rs - gas monitor host entry point
//! ==============================================================================
//!
//! purpose:
//!     long-running host that watches a gas sensor through the firebase
//!     realtime database and keeps the dashboard api fed.
//!
//! responsibilities:
//!     - load monitor.toml and user settings
//!     - construct the feed client (firebase, or the in-memory simulator)
//!     - open the sensor and registry sessions
//!     - run the monitor pipeline and the web server
//!     - tear everything down on ctrl-c
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │  monitor    │  │ web server  │  │ settings watcher    │  │
//!     │  │ (per event) │  │ (port 3000) │  │ (notify)            │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │             │
//!     │   SensorSession   RegistrySession     Arc<RwLock<Settings>> │
//!     │         └────────────────┼──────────────────────────────────┘
//!     │                          │ FeedClient
//!     └──────────────────────────┼──────────────────────────────────┘
//!                    ┌───────────┴───────────┐
//!                    ▼                       ▼
//!             ┌─────────────┐         ┌─────────────┐
//!             │  firebase   │         │ memory feed │
//!             │  (stream)   │         │ (simulated) │
//!             └─────────────┘         └─────────────┘
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::RwLock;

use gas_monitor::config::{FeedBackend, MonitorConfig};
use gas_monitor::feed::{FeedClient, FirebaseFeed, MemoryFeed};
use gas_monitor::history::HistoryBuffer;
use gas_monitor::logging;
use gas_monitor::monitor::{Monitor, SharedDashboard};
use gas_monitor::notifier::{HttpWebhook, NotificationDispatcher};
use gas_monitor::server::{self, ApiState};
use gas_monitor::settings::{self as user_settings, SettingsStore};
use gas_monitor::subscriber::{RegistrySession, SensorSession};

/// gas profile replayed by the memory backend, ppm and smoke flag
const SIMULATED_PROFILE: [(f64, u8); 9] = [
    (120.0, 0),
    (180.0, 0),
    (260.0, 0),
    (340.0, 0),
    (520.0, 0),
    (760.0, 0),
    (880.0, 1),
    (610.0, 0),
    (240.0, 0),
];
const SIMULATED_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Gas Monitor - Realtime Sensor Host");
    println!("===========================================================");

    // step 1: load configuration
    let config = MonitorConfig::load_or_default();
    config.print_summary();
    logging::init_tracing(&config.logging.level);

    // step 2: user settings, shared between the monitor and the api
    let settings = Arc::new(RwLock::new(SettingsStore::open(&config.settings.path)));
    let _settings_watcher = if config.settings.watch {
        match user_settings::watch_settings_file(settings.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!("settings hot reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    // step 3: feed client
    let mut simulator = None;
    let client: Arc<dyn FeedClient> = match config.feed.backend {
        FeedBackend::Firebase => Arc::new(FirebaseFeed::new(
            &config.feed.database_url,
            config.feed.auth_token.clone(),
            config.feed.reconnect_delay(),
        )?),
        FeedBackend::Memory => {
            let feed = MemoryFeed::new();
            simulator = Some(tokio::spawn(simulate_sensor(
                feed.clone(),
                config.feed.sensor_path.clone(),
                config.feed.registry_path.clone(),
            )));
            Arc::new(feed)
        }
    };

    // step 4: sessions
    let sensor_session = SensorSession::spawn(client.as_ref(), &config.feed.sensor_path);
    let registry_session = RegistrySession::spawn(client.as_ref(), &config.feed.registry_path);

    // step 5: monitor pipeline
    let offset = config.notifications.offset();
    let dispatcher = match &config.notifications.webhook_url {
        Some(url) => Some(NotificationDispatcher::new(
            HttpWebhook::new(url, config.notifications.timeout())?,
            offset,
        )),
        None => {
            tracing::warn!("no webhook_url configured, alerts will not be sent");
            None
        }
    };
    let dashboard = SharedDashboard::default();
    let history = HistoryBuffer::new(config.history.capacity).with_offset(offset);
    let monitor = Monitor::new(settings.clone(), dashboard.clone(), history, dispatcher)
        .show_sensor_data(config.logging.show_sensor_data);
    let monitor_task = tokio::spawn(monitor.run(sensor_session));

    // step 6: web server in background
    let api = ApiState {
        dashboard,
        settings,
        registry: registry_session.handle(),
        offset,
    };
    let bind = config.server.bind.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::run_server(&bind, api).await {
            tracing::error!("web server error: {:#}", e);
        }
    });

    println!("────────────────────────────────────────────────────────────");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // teardown: aborting the monitor drops the sensor session and its listener
    monitor_task.abort();
    server_task.abort();
    if let Some(sim) = simulator {
        sim.abort();
    }
    drop(registry_session);
    Ok(())
}

/// stand-in sensor node for the memory backend
async fn simulate_sensor(feed: MemoryFeed, sensor_path: String, registry_path: String) {
    let mut ticker = tokio::time::interval(SIMULATED_INTERVAL);
    for (value, smoke) in SIMULATED_PROFILE.iter().cycle() {
        ticker.tick().await;
        feed.set(&sensor_path, json!({"value": value, "smokeFlag": smoke}));
        feed.set(
            &registry_path,
            json!({
                "main": {
                    "info": {
                        "name": "Gas Sensor - Main",
                        "location": "Simulated",
                        "status": "active",
                    },
                    "current": {"gas": value, "smoke": smoke},
                },
            }),
        );
    }
}
