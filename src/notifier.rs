//! ==============================================================================
//! notifier.rs - rate-limited danger alerts
//! ==============================================================================
//! ```text
//!
//! purpose:
//!     decides when a reading is worth an outbound alert and posts it to the
//!     configured webhook (an n8n flow in the reference deployment).
//!
//! rule, evaluated for every new reading:
//!
//!     is_danger   = status == danger || smoke
//!     cooled_down = never sent || now - last_sent > cooldown
//!     escalated   = status != last_status && status == danger
//!
//!     send when enabled && is_danger && (cooled_down || escalated)
//!               && no delivery in flight
//!
//!     last_sent moves only on a 2xx acknowledgement, so a failed delivery
//!     is retried by the next reading that still qualifies. last_status moves
//!     on every evaluation.
//!
//! delivery:
//!     `evaluate` never waits on the network. a qualifying reading spawns the
//!     POST on its own task and the result comes back as a `Delivery` on an
//!     internal channel. `evaluate` records any that already arrived before
//!     deciding; `next_delivery` hands each one out exactly once.
//!
//! relationships:
//!     - used by: monitor.rs (one dispatcher per monitor)
//!     - policy from: settings.rs (NotificationSettings)
//!
//! ```
//! ==============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::Status;
use crate::settings::NotificationSettings;

/// cooldown applied until user settings are applied
pub const DEFAULT_COOLDOWN_MS: u64 = 100_000;

/// json body posted to the webhook
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub gas_value: f64,
    pub status: Status,
    pub is_smoke_detected: bool,
    /// local wall clock, "dd/mm/yyyy, HH.MM.SS"
    pub timestamp: String,
    #[serde(rename = "timestampISO")]
    pub timestamp_iso: String,
}

impl AlertPayload {
    pub fn new(
        value: f64,
        status: Status,
        smoke: bool,
        at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            gas_value: value,
            status,
            is_smoke_detected: smoke,
            timestamp: at.with_timezone(&offset).format("%d/%m/%Y, %H.%M.%S").to_string(),
            timestamp_iso: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// outbound delivery seam
pub trait WebhookSink: Send + Sync + 'static {
    /// deliver one alert; Ok only on acknowledgement
    fn send(&self, payload: &AlertPayload) -> impl Future<Output = Result<()>> + Send;
}

/// posts alerts as json over http
#[derive(Clone)]
pub struct HttpWebhook {
    http: reqwest::Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self { http, url: url.to_string() })
    }
}

impl WebhookSink for HttpWebhook {
    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        self.http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected alert")?;
        Ok(())
    }
}

/// what one evaluation decided
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// conditions not met, or a delivery is still in flight
    Skipped,
    /// delivery started in the background
    Dispatched,
}

/// result of one background delivery
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// timestamp of the reading that triggered it
    pub at: DateTime<Utc>,
    pub gas_value: f64,
    pub status: Status,
    /// None when the webhook acknowledged
    pub error: Option<String>,
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        self.error.is_none()
    }
}

pub struct NotificationDispatcher<W> {
    sink: Arc<W>,
    enabled: bool,
    cooldown: chrono::Duration,
    offset: FixedOffset,
    last_sent_at: Option<DateTime<Utc>>,
    last_status: Status,
    in_flight: bool,
    done_tx: mpsc::UnboundedSender<Delivery>,
    done_rx: mpsc::UnboundedReceiver<Delivery>,
    /// recorded by `evaluate` but not yet handed out by `next_delivery`
    unreported: VecDeque<Delivery>,
}

impl<W: WebhookSink> NotificationDispatcher<W> {
    pub fn new(sink: W, offset: FixedOffset) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            sink: Arc::new(sink),
            enabled: true,
            cooldown: chrono::Duration::milliseconds(DEFAULT_COOLDOWN_MS as i64),
            offset,
            last_sent_at: None,
            last_status: Status::Unknown,
            in_flight: false,
            done_tx,
            done_rx,
            unreported: VecDeque::new(),
        }
    }

    /// adopt the user's notification policy
    pub fn apply_policy(&mut self, policy: &NotificationSettings) {
        self.enabled = policy.enabled;
        self.cooldown = chrono::Duration::milliseconds(policy.cooldown.min(i64::MAX as u64) as i64);
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_sent_at
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// whether the rule would send for this reading right now
    pub fn should_dispatch(&self, status: Status, smoke: bool, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.in_flight {
            return false;
        }
        let is_danger = status == Status::Danger || smoke;
        let cooled_down = self
            .last_sent_at
            .map_or(true, |last| now - last > self.cooldown);
        let escalated = status != self.last_status && status == Status::Danger;
        is_danger && (cooled_down || escalated)
    }

    /// apply the rule to one reading; a qualifying one is posted in the background
    ///
    /// must be called from within a tokio runtime.
    pub fn evaluate(
        &mut self,
        value: f64,
        status: Status,
        smoke: bool,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        while let Ok(delivery) = self.done_rx.try_recv() {
            self.record(&delivery);
            self.unreported.push_back(delivery);
        }

        let dispatch = self.should_dispatch(status, smoke, now);
        self.last_status = status;
        if !dispatch {
            return DispatchOutcome::Skipped;
        }

        let payload = AlertPayload::new(value, status, smoke, now, self.offset);
        let sink = Arc::clone(&self.sink);
        let done = self.done_tx.clone();
        self.in_flight = true;
        tokio::spawn(async move {
            let error = sink.send(&payload).await.err().map(|e| format!("{:#}", e));
            let _ = done.send(Delivery { at: now, gas_value: value, status, error });
        });
        DispatchOutcome::Dispatched
    }

    /// wait for the next background delivery to finish and record it
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        if let Some(delivery) = self.unreported.pop_front() {
            return Some(delivery);
        }
        let delivery = self.done_rx.recv().await?;
        self.record(&delivery);
        Some(delivery)
    }

    fn record(&mut self, delivery: &Delivery) {
        self.in_flight = false;
        match &delivery.error {
            None => {
                tracing::info!(gas = delivery.gas_value, status = %delivery.status, "alert sent");
                self.last_sent_at = Some(delivery.at);
            }
            Some(e) => {
                tracing::error!(
                    gas = delivery.gas_value,
                    status = %delivery.status,
                    "failed to send alert: {}",
                    e
                );
            }
        }
    }
}
