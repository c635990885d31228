//! Shared types for audience measurement snapshots.
//!
//! These types match the JSON produced by the upstream stats server. One
//! [`Snapshot`] is a single timestamped measurement for one channel:
//! audience totals and per-platform breakdown, flux to and from peer
//! channels, the programme on air, social counters and played tracks.
//!
//! The aggregate feed groups snapshots per channel under a `stations` key;
//! [`UpdateBatch`] models that envelope and is the payload shape of both
//! `/latest.json` and every tick on the realtime topic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Current audience, its trend and the repartition by platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Audience {
    /// Total audience as reported by the upstream (authoritative).
    #[serde(default)]
    pub total: u64,
    /// Change against the previous measurement.
    #[serde(default)]
    pub change: i64,
    /// Audience count per platform, keyed by platform id.
    #[serde(default)]
    pub platforms: BTreeMap<String, u64>,
}

/// Audience movement between this channel and its peers.
///
/// `from` counts people arriving per peer channel id, `to` counts people
/// leaving towards each peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flux {
    #[serde(default)]
    pub from: BTreeMap<String, u64>,
    #[serde(default)]
    pub to: BTreeMap<String, u64>,
}

/// The programme on air during a measurement interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Programme {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Programme image, attached out-of-band after discovery enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Social counters for a measurement interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Social {
    #[serde(default)]
    pub twitter: u64,
}

/// A music track played during a measurement interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

/// One timestamped measurement record for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable channel identifier.
    #[serde(default)]
    pub channel: String,
    /// Human readable channel label.
    #[serde(default)]
    pub channel_name: String,
    /// When this measurement was generated.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub flux: Flux,
    #[serde(default)]
    pub programme: Option<Programme>,
    #[serde(default)]
    pub social: Social,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            channel: String::new(),
            channel_name: String::new(),
            timestamp: Utc::now(),
            audience: Audience::default(),
            flux: Flux::default(),
            programme: None,
            social: Social::default(),
            tracks: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Decode a snapshot from a JSON value, keyed under the given channel.
    ///
    /// The channel id comes from the envelope key, not the payload body,
    /// and a missing label is derived from the id. A total that disagrees
    /// with the platform breakdown is logged and kept as-is: the upstream
    /// total is authoritative.
    pub fn from_value(channel: &str, value: serde_json::Value) -> serde_json::Result<Self> {
        let mut snapshot: Snapshot = serde_json::from_value(value)?;
        snapshot.channel = channel.to_string();
        if snapshot.channel_name.is_empty() {
            snapshot.channel_name = humanize(channel);
        }

        let breakdown = snapshot.platform_total();
        if breakdown != snapshot.audience.total && !snapshot.audience.platforms.is_empty() {
            warn!(
                channel = %snapshot.channel,
                total = snapshot.audience.total,
                breakdown,
                "audience total disagrees with platform breakdown"
            );
        }

        Ok(snapshot)
    }

    /// Sum of the per-platform breakdown.
    pub fn platform_total(&self) -> u64 {
        self.audience.platforms.values().sum()
    }

    /// Measurement time as Unix seconds, for chart axes.
    pub fn epoch_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// The aggregate feed envelope: snapshots grouped per channel.
///
/// This is the decoded payload of every `DATA` tick for the aggregate
/// command, and the body of `/latest.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Channel id to its measurement series, oldest first.
    #[serde(default)]
    pub stations: BTreeMap<String, Vec<serde_json::Value>>,
}

impl UpdateBatch {
    /// Decode the per-channel series into [`Snapshot`]s.
    ///
    /// Entries that fail to decode are logged and skipped; one bad station
    /// never drops the rest of the tick.
    pub fn decode(self) -> BTreeMap<String, Vec<Snapshot>> {
        let mut decoded = BTreeMap::new();

        for (channel, series) in self.stations {
            let mut snapshots = Vec::with_capacity(series.len());
            for value in series {
                match Snapshot::from_value(&channel, value) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => {
                        warn!(%channel, error = %e, "dropping undecodable snapshot");
                    }
                }
            }
            decoded.insert(channel, snapshots);
        }

        decoded
    }
}

/// Derive a readable label from a channel id.
///
/// Underscores become spaces, each word is title-cased and a leading
/// "bbc" is upcased: `bbc_radio_one` becomes "BBC Radio One".
pub fn humanize(channel_id: &str) -> String {
    let spaced = channel_id.replace('_', " ");
    spaced
        .split(' ')
        .map(|word| {
            if word.eq_ignore_ascii_case("bbc") {
                "BBC".to_string()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "timestamp": "2014-06-27T20:00:00Z",
            "audience": {
                "total": 1500,
                "change": -25,
                "platforms": { "desktop": 1000, "mobile": 500 }
            },
            "flux": {
                "from": { "bbc_one": 40 },
                "to": { "bbc_two": 12 }
            },
            "programme": {
                "id": "b0074gbw",
                "title": "The Archers",
                "start": "2014-06-27T19:45:00Z",
                "end": "2014-06-27T20:15:00Z"
            },
            "social": { "twitter": 7 },
            "tracks": [ { "title": "Song", "artist": "Band" } ]
        })
    }

    #[test]
    fn test_decode_full_snapshot() {
        let snapshot = Snapshot::from_value("bbc_radio_one", sample_json()).unwrap();

        assert_eq!(snapshot.channel, "bbc_radio_one");
        assert_eq!(snapshot.channel_name, "BBC Radio One");
        assert_eq!(snapshot.audience.total, 1500);
        assert_eq!(snapshot.audience.change, -25);
        assert_eq!(snapshot.audience.platforms["desktop"], 1000);
        assert_eq!(snapshot.flux.from["bbc_one"], 40);
        assert_eq!(snapshot.programme.as_ref().unwrap().title, "The Archers");
        assert_eq!(snapshot.social.twitter, 7);
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.platform_total(), 1500);
    }

    #[test]
    fn test_decode_sparse_snapshot_uses_defaults() {
        let snapshot =
            Snapshot::from_value("bbc_two", serde_json::json!({ "audience": { "total": 9 } }))
                .unwrap();

        assert_eq!(snapshot.channel, "bbc_two");
        assert_eq!(snapshot.channel_name, "BBC Two");
        assert_eq!(snapshot.audience.total, 9);
        assert!(snapshot.audience.platforms.is_empty());
        assert!(snapshot.programme.is_none());
        assert!(snapshot.tracks.is_empty());
    }

    #[test]
    fn test_mismatched_total_is_kept() {
        let snapshot = Snapshot::from_value(
            "bbc_one",
            serde_json::json!({
                "audience": { "total": 100, "platforms": { "desktop": 30, "mobile": 30 } }
            }),
        )
        .unwrap();

        // Logged only: the upstream total wins
        assert_eq!(snapshot.audience.total, 100);
        assert_eq!(snapshot.platform_total(), 60);
    }

    #[test]
    fn test_update_batch_decode() {
        let batch: UpdateBatch = serde_json::from_value(serde_json::json!({
            "stations": {
                "bbc_one": [ { "audience": { "total": 5 } }, { "audience": { "total": 6 } } ],
                "bbc_two": [ "not an object" ]
            }
        }))
        .unwrap();

        let decoded = batch.decode();
        assert_eq!(decoded["bbc_one"].len(), 2);
        assert_eq!(decoded["bbc_one"][1].audience.total, 6);
        // Undecodable entries are skipped, the channel key survives
        assert!(decoded["bbc_two"].is_empty());
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("bbc_radio_one"), "BBC Radio One");
        assert_eq!(humanize("itv"), "Itv");
        assert_eq!(humanize("channel_4"), "Channel 4");
    }
}
