//! Bounded sliding windows and chart-facing aggregation.
//!
//! The aggregator keeps its own bounded history per channel, decoupled
//! from the processor's latest-cache: the chart can retain measurements
//! already evicted from the live cache. [`SeriesAggregator::render`]
//! recomputes the stacked series and all annotations from the current
//! window on every call; no incremental state survives between renders,
//! so window or channel changes can never leave divergent leftovers.

use std::collections::{HashMap, VecDeque};

use super::snapshot::Snapshot;

/// Default maximum snapshots retained per channel window.
pub const DEFAULT_WINDOW_LIMIT: usize = 60;

/// Default minimum spacing between two peaks, in seconds.
pub const DEFAULT_PEAK_INTERVAL_SECS: i64 = 300;

/// Whether a peak happened on a rising or falling audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakDirection {
    Positive,
    Negative,
}

/// A locally significant audience event on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakAnnotation {
    /// Unix seconds of the snapshot the peak was elected from.
    pub time: i64,
    /// Audience total at that point.
    pub total: u64,
    /// Sign of the audience change at that point.
    pub direction: PeakDirection,
    /// Dominant platform in the interval.
    pub platform: String,
}

/// Marks the start of a programme on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammeAnnotation {
    pub programme_id: String,
    /// Unix seconds of the programme's first-seen start time.
    pub time: i64,
    pub label: String,
}

/// One stacked band of the audience chart.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBand {
    pub platform: String,
    /// `(unix_seconds, audience)` points, chronological.
    pub points: Vec<(i64, u64)>,
}

/// Everything the chart needs for one channel, fully recomputed.
#[derive(Debug, Clone, Default)]
pub struct ChartView {
    pub series: Vec<SeriesBand>,
    pub peaks: Vec<PeakAnnotation>,
    pub programmes: Vec<ProgrammeAnnotation>,
}

impl Default for SeriesAggregator {
    fn default() -> Self {
        Self::new(
            DEFAULT_WINDOW_LIMIT,
            DEFAULT_PEAK_INTERVAL_SECS,
            vec!["desktop".to_string(), "mobile".to_string()],
        )
    }
}

/// Maintains bounded per-channel windows and derives chart data.
pub struct SeriesAggregator {
    /// Bounded recent history per channel, oldest first.
    windows: HashMap<String, VecDeque<Snapshot>>,
    limit: usize,
    peak_interval_secs: i64,
    /// Platform set for stacking and peak election. The order is the
    /// deterministic tie-break for peak election.
    platforms: Vec<String>,
}

impl SeriesAggregator {
    pub fn new(limit: usize, peak_interval_secs: i64, platforms: Vec<String>) -> Self {
        Self {
            windows: HashMap::new(),
            limit,
            peak_interval_secs,
            platforms,
        }
    }

    /// Append snapshots to their channels' windows, truncating each
    /// window to the most recent `limit` entries in chronological order.
    pub fn append_batch(&mut self, snapshots: impl IntoIterator<Item = Snapshot>) {
        for snapshot in snapshots {
            let window = self.windows.entry(snapshot.channel.clone()).or_default();
            window.push_back(snapshot);
            while window.len() > self.limit {
                window.pop_front();
            }
        }
    }

    /// Number of snapshots currently windowed for a channel.
    pub fn window_len(&self, channel: &str) -> usize {
        self.windows.get(channel).map_or(0, VecDeque::len)
    }

    /// Recompute series and annotations for one channel.
    pub fn render(&self, channel: &str) -> ChartView {
        let Some(window) = self.windows.get(channel) else {
            return ChartView::default();
        };

        ChartView {
            series: self.stacked_series(window),
            peaks: self.peaks(window),
            programmes: programme_annotations(window),
        }
    }

    /// Collapse a contiguous window sub-range into one synthetic
    /// snapshot: numeric leaves are summed, list fields concatenated,
    /// and scalar identity fields (channel, timestamp, programme) come
    /// from the first element. A single-element range returns that
    /// element unchanged.
    pub fn aggregate_range(&self, channel: &str, start: usize, count: usize) -> Option<Snapshot> {
        let window = self.windows.get(channel)?;
        if count == 0 || start >= window.len() {
            return None;
        }
        let end = (start + count).min(window.len());

        let mut range = window.iter().skip(start).take(end - start);
        let mut aggregate = range.next()?.clone();

        for item in range {
            aggregate.audience.total += item.audience.total;
            aggregate.audience.change += item.audience.change;
            for (platform, count) in &item.audience.platforms {
                *aggregate.audience.platforms.entry(platform.clone()).or_insert(0) += count;
            }
            for (peer, count) in &item.flux.from {
                *aggregate.flux.from.entry(peer.clone()).or_insert(0) += count;
            }
            for (peer, count) in &item.flux.to {
                *aggregate.flux.to.entry(peer.clone()).or_insert(0) += count;
            }
            aggregate.social.twitter += item.social.twitter;
            aggregate.tracks.extend(item.tracks.iter().cloned());
        }

        Some(aggregate)
    }

    fn stacked_series(&self, window: &VecDeque<Snapshot>) -> Vec<SeriesBand> {
        self.platforms
            .iter()
            .map(|platform| SeriesBand {
                platform: platform.clone(),
                points: window
                    .iter()
                    .map(|s| {
                        (
                            s.epoch_secs(),
                            s.audience.platforms.get(platform).copied().unwrap_or(0),
                        )
                    })
                    .collect(),
            })
            .collect()
    }

    /// Walk the window chronologically and elect peaks under the
    /// minimum-spacing rule.
    ///
    /// The first candidate is always eligible; after that a snapshot
    /// closer than `peak_interval_secs` to the previous peak is skipped.
    /// The dominant platform is the highest-valued one among the
    /// configured set, ties broken by configured order; a snapshot with
    /// no positive platform value is not a peak and does not advance the
    /// spacing clock.
    fn peaks(&self, window: &VecDeque<Snapshot>) -> Vec<PeakAnnotation> {
        let mut peaks = Vec::new();
        let mut last_peak_time: Option<i64> = None;

        for snapshot in window {
            let time = snapshot.epoch_secs();
            if let Some(last) = last_peak_time {
                if time - last < self.peak_interval_secs {
                    continue;
                }
            }

            let mut elected: Option<&str> = None;
            let mut highest: u64 = 0;
            for platform in &self.platforms {
                let value = snapshot.audience.platforms.get(platform).copied().unwrap_or(0);
                if value > highest {
                    elected = Some(platform);
                    highest = value;
                }
            }
            let Some(platform) = elected else {
                continue;
            };

            let direction = if snapshot.audience.change < 0 {
                PeakDirection::Negative
            } else {
                PeakDirection::Positive
            };
            peaks.push(PeakAnnotation {
                time,
                total: snapshot.audience.total,
                direction,
                platform: platform.to_string(),
            });
            last_peak_time = Some(time);
        }

        peaks
    }
}

/// One annotation per distinct programme id, at its first-seen start.
fn programme_annotations(window: &VecDeque<Snapshot>) -> Vec<ProgrammeAnnotation> {
    let mut seen: HashMap<&str, ()> = HashMap::new();
    let mut annotations = Vec::new();

    for snapshot in window {
        let Some(programme) = &snapshot.programme else {
            continue;
        };
        if programme.id.is_empty() || seen.contains_key(programme.id.as_str()) {
            continue;
        }
        let Some(start) = programme.start else {
            continue;
        };
        seen.insert(&programme.id, ());
        annotations.push(ProgrammeAnnotation {
            programme_id: programme.id.clone(),
            time: start.timestamp(),
            label: format!("\u{201c}{}\u{201d} programme starts.", programme.title),
        });
    }

    annotations
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::data::snapshot::{Audience, Programme};

    fn snap(channel: &str, epoch: i64, desktop: u64, mobile: u64, change: i64) -> Snapshot {
        Snapshot {
            channel: channel.to_string(),
            channel_name: channel.to_string(),
            timestamp: Utc.timestamp_opt(epoch, 0).unwrap(),
            audience: Audience {
                total: desktop + mobile,
                change,
                platforms: [
                    ("desktop".to_string(), desktop),
                    ("mobile".to_string(), mobile),
                ]
                .into(),
            },
            ..Snapshot::default()
        }
    }

    fn aggregator() -> SeriesAggregator {
        SeriesAggregator::new(
            DEFAULT_WINDOW_LIMIT,
            DEFAULT_PEAK_INTERVAL_SECS,
            vec!["desktop".to_string(), "mobile".to_string()],
        )
    }

    #[test]
    fn test_window_bound_keeps_most_recent() {
        // 65 snapshots one minute apart against a limit of 60
        let mut agg = aggregator();
        agg.append_batch((0..65).map(|i| snap("bbc_one", i * 60, 10, 5, 0)));

        assert_eq!(agg.window_len("bbc_one"), 60);
        let view = agg.render("bbc_one");
        let points = &view.series[0].points;
        assert_eq!(points.first().unwrap().0, 300);
        assert_eq!(points.last().unwrap().0, 3840);
        // Chronological order is preserved
        assert!(points.windows(2).all(|p| p[0].0 < p[1].0));
    }

    #[test]
    fn test_windows_are_per_channel() {
        let mut agg = aggregator();
        agg.append_batch(vec![
            snap("bbc_one", 0, 1, 0, 0),
            snap("bbc_two", 0, 2, 0, 0),
            snap("bbc_one", 60, 3, 0, 0),
        ]);

        assert_eq!(agg.window_len("bbc_one"), 2);
        assert_eq!(agg.window_len("bbc_two"), 1);
        assert_eq!(agg.window_len("itv"), 0);
    }

    #[test]
    fn test_stacked_series_covers_configured_platforms() {
        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 0, 100, 40, 0)]);

        let view = agg.render("bbc_one");
        assert_eq!(view.series.len(), 2);
        assert_eq!(view.series[0].platform, "desktop");
        assert_eq!(view.series[0].points, vec![(0, 100)]);
        assert_eq!(view.series[1].platform, "mobile");
        assert_eq!(view.series[1].points, vec![(0, 40)]);
    }

    #[test]
    fn test_peak_spacing_suppresses_close_peaks() {
        // One snapshot per minute for 20 minutes; platform activity only
        // at minutes 0, 4 and 6. With 300s spacing the minute-4 peak is
        // suppressed and minute 6 is the next elected peak.
        let mut agg = aggregator();
        agg.append_batch((0..20).map(|i| {
            let value = match i {
                0 | 4 | 6 => 500,
                _ => 0,
            };
            snap("bbc_one", i * 60, value, 0, 1)
        }));

        let peaks = agg.render("bbc_one").peaks;
        let times: Vec<i64> = peaks.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0, 360]);
    }

    #[test]
    fn test_first_candidate_is_always_eligible() {
        // The spacing rule only applies once a previous peak exists; a
        // window starting inside the first interval still gets its peak.
        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 0, 100, 0, 1)]);
        assert_eq!(agg.render("bbc_one").peaks[0].time, 0);

        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 120, 100, 0, 1)]);
        assert_eq!(agg.render("bbc_one").peaks[0].time, 120);
    }

    #[test]
    fn test_consecutive_peaks_respect_interval() {
        // Continuous activity: a peak every 300s exactly
        let mut agg = aggregator();
        agg.append_batch((0..20).map(|i| snap("bbc_one", i * 60, 10 + i as u64, 0, 1)));

        let peaks = agg.render("bbc_one").peaks;
        assert!(!peaks.is_empty());
        assert!(peaks
            .windows(2)
            .all(|p| p[1].time - p[0].time >= DEFAULT_PEAK_INTERVAL_SECS));
        assert_eq!(
            peaks.iter().map(|p| p.time).collect::<Vec<_>>(),
            vec![0, 300, 600, 900]
        );
    }

    #[test]
    fn test_peak_election_is_deterministic_on_ties() {
        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 0, 50, 50, 0)]);

        let peaks = agg.render("bbc_one").peaks;
        assert_eq!(peaks.len(), 1);
        // Equal values elect the first platform in configured order
        assert_eq!(peaks[0].platform, "desktop");

        let mut agg = SeriesAggregator::new(
            DEFAULT_WINDOW_LIMIT,
            DEFAULT_PEAK_INTERVAL_SECS,
            vec!["mobile".to_string(), "desktop".to_string()],
        );
        agg.append_batch(vec![snap("bbc_one", 0, 50, 50, 0)]);
        assert_eq!(agg.render("bbc_one").peaks[0].platform, "mobile");
    }

    #[test]
    fn test_peak_direction_follows_change_sign() {
        let mut agg = aggregator();
        agg.append_batch(vec![
            snap("bbc_one", 0, 10, 0, -5),
            snap("bbc_one", 600, 10, 0, 0),
        ]);

        let peaks = agg.render("bbc_one").peaks;
        assert_eq!(peaks[0].direction, PeakDirection::Negative);
        // Zero change counts as positive
        assert_eq!(peaks[1].direction, PeakDirection::Positive);
    }

    #[test]
    fn test_render_is_a_full_recompute() {
        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 0, 10, 0, 0)]);
        assert_eq!(agg.render("bbc_one").peaks.len(), 1);

        // Evict everything by flooding the window; the old peak is gone
        agg.append_batch((1..=60).map(|i| snap("bbc_one", 100_000 + i * 60, 0, 0, 0)));
        assert!(agg.render("bbc_one").peaks.is_empty());
    }

    fn programme(id: &str, title: &str, start_epoch: i64) -> Option<Programme> {
        Some(Programme {
            id: id.to_string(),
            title: title.to_string(),
            start: Some(Utc.timestamp_opt(start_epoch, 0).unwrap()),
            ..Programme::default()
        })
    }

    #[test]
    fn test_one_annotation_per_programme() {
        let mut agg = aggregator();
        let mut snapshots = vec![
            snap("bbc_one", 0, 1, 0, 0),
            snap("bbc_one", 60, 1, 0, 0),
            snap("bbc_one", 120, 1, 0, 0),
            snap("bbc_one", 180, 1, 0, 0),
        ];
        snapshots[0].programme = programme("p1", "News", 0);
        snapshots[1].programme = programme("p1", "News", 0);
        snapshots[2].programme = programme("p2", "Weather", 120);
        // No programme on the last snapshot

        agg.append_batch(snapshots);
        let programmes = agg.render("bbc_one").programmes;
        assert_eq!(programmes.len(), 2);
        assert_eq!(programmes[0].programme_id, "p1");
        assert_eq!(programmes[0].time, 0);
        assert_eq!(programmes[1].programme_id, "p2");
        assert!(programmes[0].label.contains("News"));
    }

    #[test]
    fn test_aggregate_single_element_is_identity() {
        let mut agg = aggregator();
        let mut snapshot = snap("bbc_one", 60, 100, 40, 7);
        snapshot.programme = programme("p1", "News", 0);
        agg.append_batch(vec![snap("bbc_one", 0, 1, 1, 1), snapshot.clone()]);

        assert_eq!(agg.aggregate_range("bbc_one", 1, 1), Some(snapshot));
    }

    #[test]
    fn test_aggregate_sums_numeric_and_concatenates_lists() {
        let mut agg = aggregator();
        let mut first = snap("bbc_one", 0, 100, 40, 5);
        first.flux.from.insert("bbc_two".to_string(), 3);
        first.social.twitter = 2;
        first.tracks.push(crate::data::snapshot::Track {
            title: "One".to_string(),
            artist: "A".to_string(),
        });
        first.programme = programme("p1", "News", 0);

        let mut second = snap("bbc_one", 60, 10, 4, -2);
        second.flux.from.insert("bbc_two".to_string(), 1);
        second.flux.to.insert("itv".to_string(), 9);
        second.social.twitter = 1;
        second.tracks.push(crate::data::snapshot::Track {
            title: "Two".to_string(),
            artist: "B".to_string(),
        });
        second.programme = programme("p2", "Weather", 60);

        agg.append_batch(vec![first.clone(), second]);
        let combined = agg.aggregate_range("bbc_one", 0, 2).unwrap();

        assert_eq!(combined.audience.total, 154);
        assert_eq!(combined.audience.change, 3);
        assert_eq!(combined.audience.platforms["desktop"], 110);
        assert_eq!(combined.audience.platforms["mobile"], 44);
        assert_eq!(combined.flux.from["bbc_two"], 4);
        assert_eq!(combined.flux.to["itv"], 9);
        assert_eq!(combined.social.twitter, 3);
        assert_eq!(combined.tracks.len(), 2);
        // Identity fields come from the first element
        assert_eq!(combined.timestamp, first.timestamp);
        assert_eq!(combined.programme, first.programme);
        assert_eq!(combined.channel, "bbc_one");
    }

    #[test]
    fn test_aggregate_range_bounds() {
        let mut agg = aggregator();
        agg.append_batch(vec![snap("bbc_one", 0, 1, 0, 0), snap("bbc_one", 60, 2, 0, 0)]);

        assert!(agg.aggregate_range("bbc_one", 0, 0).is_none());
        assert!(agg.aggregate_range("bbc_one", 2, 1).is_none());
        assert!(agg.aggregate_range("unknown", 0, 1).is_none());
        // A range reaching past the end clamps to the window
        let clamped = agg.aggregate_range("bbc_one", 1, 10).unwrap();
        assert_eq!(clamped.audience.total, 2);
    }
}
