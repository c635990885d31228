//! Consumer-side processing of the realtime aggregate feed.
//!
//! The processor subscribes to the relay topic, keeps the most recent
//! snapshot per channel and applies a runtime-mutable channel filter.
//! An empty filter passes every channel; filter changes take effect on
//! the next read and never backfill - a newly added channel populates on
//! its next published tick.
//!
//! Initial and historical data come from the relay's HTTP surface. A
//! historical fetch carries a per-channel request generation so a
//! superseded response is discarded instead of racing a newer one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::snapshot::{Snapshot, UpdateBatch};
use crate::relay::RelayError;

/// Filtering consumer holding the latest snapshot per channel.
pub struct StatsProcessor {
    updates: broadcast::Receiver<Value>,
    /// Channel ids to render; empty means pass-all.
    filter: HashSet<String>,
    /// Most recent snapshot per channel, replaced wholesale per tick.
    latest: HashMap<String, Snapshot>,
    client: reqwest::Client,
    relay_base: String,
    /// Per-channel request generation for historical fetches.
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl StatsProcessor {
    /// Create a processor reading ticks from the given topic subscription
    /// and fetching snapshots from the relay's HTTP base URL.
    pub fn new(relay_base: impl Into<String>, updates: broadcast::Receiver<Value>) -> Self {
        Self {
            updates,
            filter: HashSet::new(),
            latest: HashMap::new(),
            client: reqwest::Client::new(),
            relay_base: relay_base.into(),
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a channel to the filter. Repeated adds are a single add.
    pub fn add_filter(&mut self, channel: impl Into<String>) {
        self.filter.insert(channel.into());
    }

    /// Remove a channel from the filter. Absent ids are a no-op.
    pub fn remove_filter(&mut self, channel: &str) {
        self.filter.remove(channel);
    }

    /// Whether a channel currently passes the filter.
    pub fn passes_filter(&self, channel: &str) -> bool {
        self.filter.is_empty() || self.filter.contains(channel)
    }

    /// Drain pending topic ticks without blocking.
    ///
    /// Returns how many ticks were merged. Lagging behind the topic
    /// buffer loses the skipped ticks, never the subscription.
    pub fn poll_updates(&mut self) -> usize {
        let mut merged = 0;
        loop {
            match self.updates.try_recv() {
                Ok(value) => {
                    self.merge_tick(value);
                    merged += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "stats processor lagged behind the topic");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        merged
    }

    /// Wait for the next topic tick and merge it.
    pub async fn next_update(&mut self) -> bool {
        loop {
            match self.updates.recv().await {
                Ok(value) => {
                    self.merge_tick(value);
                    return true;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stats processor lagged behind the topic");
                }
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }

    fn merge_tick(&mut self, value: Value) {
        match serde_json::from_value::<UpdateBatch>(value) {
            Ok(batch) => self.merge_batch(batch),
            Err(e) => warn!(error = %e, "dropping undecodable aggregate tick"),
        }
    }

    /// Merge a decoded batch by full per-channel replacement.
    ///
    /// Channels absent from the batch keep their previous latest
    /// snapshot; channels present replace theirs with the newest entry
    /// of the series.
    pub fn merge_batch(&mut self, batch: UpdateBatch) {
        for (channel, series) in batch.decode() {
            if let Some(newest) = series.into_iter().next_back() {
                self.latest.insert(channel, newest);
            }
        }
    }

    /// Latest snapshot per channel passing the filter, ordered by id.
    pub fn latest(&self) -> Vec<&Snapshot> {
        let mut snapshots: Vec<&Snapshot> = self
            .latest
            .values()
            .filter(|s| self.passes_filter(&s.channel))
            .collect();
        snapshots.sort_by(|a, b| a.channel.cmp(&b.channel));
        snapshots
    }

    /// Fetch the initial per-channel latest map before realtime data
    /// flows, then return the filtered latest list.
    pub async fn initial_data(&mut self) -> Result<Vec<Snapshot>, RelayError> {
        let url = format!("{}/latest.json", self.relay_base);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RelayError::Http(format!(
                "latest returned status {}",
                response.status()
            )));
        }

        let batch: UpdateBatch = response.json().await.map_err(|e| {
            RelayError::Http(format!("undecodable latest payload: {}", e))
        })?;
        self.merge_batch(batch);
        Ok(self.latest().into_iter().cloned().collect())
    }

    /// Fetch a channel's bounded recent window.
    ///
    /// Returns `Ok(None)` when a newer request for the same channel was
    /// started while this one was in flight; the superseded response
    /// must be discarded by the caller.
    pub async fn historical_by_channel(
        &self,
        channel: &str,
    ) -> Result<Option<Vec<Snapshot>>, RelayError> {
        let generation = self.begin_historical(channel);

        let url = format!("{}/{}/historical.json", self.relay_base, channel);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RelayError::Http(format!(
                "historical for {} returned status {}",
                channel,
                response.status()
            )));
        }
        let series: Vec<Value> = response.json().await.map_err(|e| {
            RelayError::Http(format!("undecodable historical payload: {}", e))
        })?;

        if !self.historical_is_current(channel, generation) {
            debug!(%channel, generation, "discarding superseded historical response");
            return Ok(None);
        }

        let snapshots = series
            .into_iter()
            .filter_map(|value| Snapshot::from_value(channel, value).ok())
            .collect();
        Ok(Some(snapshots))
    }

    fn begin_historical(&self, channel: &str) -> u64 {
        let mut generations = self.generations.lock();
        let generation = generations.entry(channel.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn historical_is_current(&self, channel: &str, generation: u64) -> bool {
        self.generations.lock().get(channel).copied() == Some(generation)
    }
}
