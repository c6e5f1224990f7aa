//! tracing setup.
//!
//! `GAS_MONITOR_LOG` takes a full filter directive
//! (e.g. `gas_monitor=debug,reqwest=warn`); otherwise the configured level
//! applies to this crate. safe to call more than once.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "GAS_MONITOR_LOG";

pub fn init_tracing(level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(format!("gas_monitor={}", level)))
            .unwrap_or_else(|_| EnvFilter::new("gas_monitor=info"));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    });
}
