//! ==============================================================================
//! feed/mod.rs - realtime feed transport abstraction
//! ==============================================================================
//!
//! purpose:
//!     a unified interface for subscribing to a path of the realtime database.
//!     abstracts away the difference between the live firebase stream and an
//!     in-process feed used for tests and offline demos.
//!
//! relationships:
//!     - used by: subscriber.rs (sessions own one Subscription per path)
//!     - implemented by: firebase.rs (reqwest event stream), memory.rs
//!
//! contract:
//!     - every event for a path arrives in the order the transport emits it
//!     - a Subscription holds exactly one listener; dropping it releases the
//!       listener, whatever path the owner took out of scope
//!
//! ==============================================================================

pub mod firebase;
pub mod memory;
pub mod sse;

pub use firebase::FirebaseFeed;
pub use memory::MemoryFeed;

use tokio::sync::mpsc;

/// one inbound event from a subscribed path
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// full value of the path after a change (null when absent)
    Snapshot(serde_json::Value),
    /// transport or server reported a failure; human-readable cause
    Error(String),
}

pub trait FeedClient: Send + Sync {
    /// open a listener on `path`
    fn subscribe(&self, path: &str) -> Subscription;
}

type Release = Box<dyn FnOnce() + Send>;

/// an active listener; releases itself on drop
pub struct Subscription {
    path: String,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        path: impl Into<String>,
        events: mpsc::UnboundedReceiver<FeedEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// next event, or `None` once the transport has shut down
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(path = %self.path, "feed listener released");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish()
    }
}
