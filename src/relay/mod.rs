//! Publish/subscribe relay between the command registry and consumers.
//!
//! The bridge installs a listener for the well-known aggregate command;
//! every `DATA` tick it receives is stored in a shared latest slot (for
//! the initial-paint snapshot endpoint) and republished on a broadcast
//! topic. Delivery on the topic is at-most-once with no backpressure: a
//! slow consumer lags and misses ticks rather than stalling the
//! publisher.
//!
//! The bridge also proxies read-only discovery and historical requests to
//! the upstream HTTP service, merging the configured title/logo override
//! table into discovery responses. Proxy failures are the one error class
//! surfaced outward; everything upstream of the dashboard degrades to
//! stale data instead of crashing.

mod http;
mod overrides;

pub use http::run_server;
pub use overrides::{load as load_overrides, merge_discovery, OverrideTable, TitleOverride};

use std::sync::Arc;

use hyper::body::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

use crate::client::CommandRegistry;
use crate::protocol::Command;

/// Buffered ticks per subscriber before a slow consumer starts lagging.
const TOPIC_CAPACITY: usize = 32;

/// Errors from proxied discovery/historical fetches.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream returned a non-success status or an HTTP-level failure.
    #[error("upstream request failed: {0}")]
    Http(String),

    /// Could not reach the upstream service.
    #[error("upstream connection failed: {0}")]
    Connection(String),

    /// Upstream did not answer in time.
    #[error("upstream request timed out")]
    Timeout,
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::Timeout
        } else if err.is_connect() {
            RelayError::Connection(err.to_string())
        } else {
            RelayError::Http(err.to_string())
        }
    }
}

/// Republishes aggregate ticks and proxies upstream read-only requests.
#[derive(Clone)]
pub struct RelayBridge {
    /// Latest aggregate payload, served before realtime establishes.
    latest: Arc<RwLock<Option<Value>>>,
    topic: broadcast::Sender<Value>,
    overrides: Arc<OverrideTable>,
    upstream_base: String,
    client: reqwest::Client,
}

impl RelayBridge {
    /// Create a bridge proxying to the given upstream HTTP base URL.
    pub fn new(upstream_base: impl Into<String>, overrides: OverrideTable) -> Self {
        let (topic, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            latest: Arc::new(RwLock::new(None)),
            topic,
            overrides: Arc::new(overrides),
            upstream_base: upstream_base.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Register the republishing listener for the aggregate command.
    pub fn install(&self, registry: &mut CommandRegistry, command: Command) {
        info!(%command, "relay bridge subscribing to aggregate command");
        let latest = self.latest.clone();
        let topic = self.topic.clone();

        registry.register(command, move |value: &Value| {
            *latest.write() = Some(value.clone());
            // No receivers is fine; lagged receivers skip ticks.
            let _ = topic.send(value.clone());
            Ok(())
        });
    }

    /// Subscribe to the republished aggregate topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.topic.subscribe()
    }

    /// Latest cached aggregate, or an empty object before the first tick.
    pub fn latest(&self) -> Value {
        self.latest
            .read()
            .clone()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Fetch the channel list from upstream with overrides merged in.
    pub async fn discovery(&self) -> Result<Value, RelayError> {
        let url = format!("{}/discovery.json", self.upstream_base);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RelayError::Http(format!(
                "discovery returned status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        Ok(merge_discovery(body, &self.overrides))
    }

    /// Proxy a channel's recent history from upstream, verbatim.
    ///
    /// Returns the upstream content type (when present) and the raw body.
    pub async fn historical(&self, channel: &str) -> Result<(Option<String>, Bytes), RelayError> {
        let url = format!("{}/{}/historical.json", self.upstream_base, channel);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RelayError::Http(format!(
                "historical for {} returned status {}",
                channel,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok((content_type, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str) -> Command {
        Command::new(text).unwrap()
    }

    #[test]
    fn test_install_updates_latest_and_publishes() {
        let bridge = RelayBridge::new("http://localhost:9000", OverrideTable::new());
        let mut registry = CommandRegistry::new();
        bridge.install(&mut registry, command("overview"));

        let mut rx = bridge.subscribe();
        assert_eq!(bridge.latest(), serde_json::json!({}));

        registry.on_message(crate::protocol::Message::parse(
            r#"DATA overview {"stations":{"bbc_one":[]}}"#,
        ));

        let expected = serde_json::json!({"stations":{"bbc_one":[]}});
        assert_eq!(bridge.latest(), expected);
        assert_eq!(rx.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bridge = RelayBridge::new("http://localhost:9000", OverrideTable::new());
        let mut registry = CommandRegistry::new();
        bridge.install(&mut registry, command("overview"));

        registry.on_message(crate::protocol::Message::parse(r#"DATA overview {"n":1}"#));
        assert_eq!(bridge.latest(), serde_json::json!({"n":1}));
    }

    #[tokio::test]
    async fn test_slow_subscriber_misses_ticks() {
        let bridge = RelayBridge::new("http://localhost:9000", OverrideTable::new());
        let mut rx = bridge.subscribe();

        for n in 0..(TOPIC_CAPACITY + 8) {
            let _ = bridge.topic.send(serde_json::json!({ "n": n }));
        }

        // The first receive reports the lag, subsequent ones resume from
        // the oldest retained tick.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 8),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(rx.recv().await.is_ok());
    }
}
