//! gas-monitor: realtime gas sensor pipeline.
//!
//! readings stream in from a firebase realtime database (or an in-memory
//! feed), are classified into safe / warning / danger tiers, kept in a
//! rolling history, and raise rate-limited webhook alerts. the derived state
//! is served as a json api for the dashboard and exporters.

pub mod classifier;
pub mod config;
pub mod domain;
pub mod feed;
pub mod history;
pub mod logging;
pub mod monitor;
pub mod notifier;
pub mod report;
pub mod server;
pub mod settings;
pub mod stats;
pub mod subscriber;
