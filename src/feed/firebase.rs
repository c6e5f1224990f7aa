//! ==============================================================================
//! firebase.rs - firebase realtime database streaming transport
//! ==============================================================================
//!
//! purpose:
//!     subscribes to a database path over the REST streaming api
//!     (`GET {db}/{path}.json` with `Accept: text/event-stream`) and turns
//!     `put` / `patch` events into full-path snapshots.
//!
//! reconnection:
//!     when the stream drops, listeners receive a FeedEvent::Error with the
//!     cause and the transport reconnects after `reconnect_delay`. firebase
//!     sends the full value again on connect, so sessions recover on their own.
//!
//! relationships:
//!     - implements: feed/mod.rs (FeedClient)
//!     - uses: feed/sse.rs (event decoding, tree updates)
//!     - constructed by: main.rs from [feed] in monitor.toml
//!
//! ==============================================================================

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use super::sse::{apply_patch, apply_put, FirebaseEvent, SseDecoder};
use super::{FeedClient, FeedEvent, Subscription};

#[derive(Clone)]
pub struct FirebaseFeed {
    http: reqwest::Client,
    database_url: String,
    auth_token: Option<String>,
    reconnect_delay: Duration,
}

impl FirebaseFeed {
    pub fn new(
        database_url: &str,
        auth_token: Option<String>,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build firebase http client")?;

        Ok(Self {
            http,
            database_url: database_url.trim_end_matches('/').to_string(),
            auth_token,
            reconnect_delay,
        })
    }

    /// REST url of a database path
    pub fn path_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url, path.trim_matches('/'))
    }
}

impl FeedClient for FirebaseFeed {
    fn subscribe(&self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = self.clone();
        let owned_path = path.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let outcome = feed.stream_once(&owned_path, &tx).await;
                if tx.is_closed() {
                    break;
                }
                let cause = match outcome {
                    Ok(()) => "stream closed by server".to_string(),
                    Err(e) => format!("{:#}", e),
                };
                tracing::warn!(path = %owned_path, "feed stream lost: {}", cause);
                if tx.send(FeedEvent::Error(cause)).is_err() {
                    break;
                }
                tokio::time::sleep(feed.reconnect_delay).await;
            }
        });

        Subscription::new(path, rx, move || handle.abort())
    }
}

impl FirebaseFeed {
    /// run one streaming connection until it ends or the listener goes away
    async fn stream_once(&self, path: &str, tx: &mpsc::UnboundedSender<FeedEvent>) -> Result<()> {
        let mut request = self
            .http
            .get(self.path_url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.query(&[("auth", token)]);
        }

        let mut response = request
            .send()
            .await
            .context("failed to connect to realtime database")?
            .error_for_status()
            .context("realtime database rejected the stream")?;

        tracing::info!(path, "feed stream connected");

        let mut decoder = SseDecoder::new();
        let mut tree = Value::Null;

        while let Some(chunk) = response.chunk().await.context("stream read failed")? {
            for raw in decoder.push(&chunk) {
                let event = match FirebaseEvent::parse(&raw) {
                    Ok(ev) => ev,
                    Err(e) => {
                        tracing::warn!(path, "skipping malformed {} event: {}", raw.event, e);
                        continue;
                    }
                };

                match event {
                    FirebaseEvent::Put { path: at, data } => apply_put(&mut tree, &at, data),
                    FirebaseEvent::Patch { path: at, data } => apply_patch(&mut tree, &at, data),
                    FirebaseEvent::KeepAlive => continue,
                    FirebaseEvent::Cancel(reason) => {
                        return Err(anyhow!("subscription cancelled: {}", reason));
                    }
                    FirebaseEvent::AuthRevoked => {
                        return Err(anyhow!("auth credential revoked"));
                    }
                    FirebaseEvent::Unknown(name) => {
                        tracing::debug!(path, "ignoring event type {}", name);
                        continue;
                    }
                }

                if tx.send(FeedEvent::Snapshot(tree.clone())).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse};
    use axum::{routing::get, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SENSOR_STREAM: &str = concat!(
        "event: put\n",
        "data: {\"path\":\"/\",\"data\":{\"value\":100,\"smokeFlag\":0}}\n\n",
        "event: keep-alive\n",
        "data: null\n\n",
        "event: patch\n",
        "data: {\"path\":\"/\",\"data\":{\"value\":450}}\n\n",
    );

    const CANCEL_STREAM: &str = "event: cancel\ndata: \"permission denied\"\n\n";

    async fn sensor_stream(State(connections): State<Arc<AtomicUsize>>) -> impl IntoResponse {
        connections.fetch_add(1, Ordering::SeqCst);
        ([(header::CONTENT_TYPE, "text/event-stream")], SENSOR_STREAM)
    }

    async fn cancel_stream() -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "text/event-stream")], CANCEL_STREAM)
    }

    async fn locked() -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    /// local stand-in for the realtime database; returns its base url
    async fn serve_database(connections: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route("/sensor_gas.json", get(sensor_stream))
            .route("/cancelled.json", get(cancel_stream))
            .route("/locked.json", get(locked))
            .with_state(connections);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn next_event(sub: &mut Subscription) -> FeedEvent {
        tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("no feed event within 5s")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn streams_snapshots_then_reconnects_after_close() {
        let connections = Arc::new(AtomicUsize::new(0));
        let base = serve_database(connections.clone()).await;
        let feed = FirebaseFeed::new(&base, None, Duration::from_millis(20)).unwrap();
        let mut sub = feed.subscribe("sensor_gas");

        let first = next_event(&mut sub).await;
        assert_eq!(first, FeedEvent::Snapshot(json!({"value": 100, "smokeFlag": 0})));
        assert_eq!(
            next_event(&mut sub).await,
            FeedEvent::Snapshot(json!({"value": 450, "smokeFlag": 0}))
        );

        match next_event(&mut sub).await {
            FeedEvent::Error(cause) => assert!(cause.contains("closed"), "{}", cause),
            other => panic!("expected error, got {:?}", other),
        }

        // a fresh connection starts from an empty tree and replays the put
        assert_eq!(next_event(&mut sub).await, first);
        assert!(connections.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancel_and_http_errors_surface_as_feed_errors() {
        let base = serve_database(Arc::default()).await;
        let feed = FirebaseFeed::new(&base, None, Duration::from_secs(60)).unwrap();

        let mut cancelled = feed.subscribe("cancelled");
        match next_event(&mut cancelled).await {
            FeedEvent::Error(cause) => assert!(cause.contains("permission denied"), "{}", cause),
            other => panic!("expected error, got {:?}", other),
        }

        let mut locked = feed.subscribe("locked");
        match next_event(&mut locked).await {
            FeedEvent::Error(cause) => assert!(cause.contains("rejected"), "{}", cause),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn builds_rest_urls() {
        let feed = FirebaseFeed::new(
            "https://example-default-rtdb.firebaseio.com/",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            feed.path_url("sensor_gas"),
            "https://example-default-rtdb.firebaseio.com/sensor_gas.json"
        );
        assert_eq!(
            feed.path_url("/sensors/"),
            "https://example-default-rtdb.firebaseio.com/sensors.json"
        );
    }
}
