//! Data models and processing for audience snapshots.
//!
//! This module turns raw per-minute payloads into structured snapshots
//! and derives everything the dashboard consumes from them.
//!
//! ## Submodules
//!
//! - [`snapshot`]: Core data models ([`Snapshot`], [`Audience`], [`UpdateBatch`])
//! - [`processor`]: Channel filtering and the latest-per-channel cache
//! - [`series`]: Bounded sliding windows, peaks and programme annotations
//!
//! ## Data Flow
//!
//! ```text
//! minute payload (raw JSON)
//!        │
//!        ▼
//! UpdateBatch::decode()
//!        │
//!        ├──▶ StatsProcessor (filter + latest cache)
//!        │
//!        └──▶ SeriesAggregator (windows, render, aggregate_range)
//! ```

pub mod processor;
pub mod series;
pub mod snapshot;

pub use processor::StatsProcessor;
pub use series::{
    ChartView, PeakAnnotation, PeakDirection, ProgrammeAnnotation, SeriesAggregator, SeriesBand,
    DEFAULT_PEAK_INTERVAL_SECS, DEFAULT_WINDOW_LIMIT,
};
pub use snapshot::{Audience, Flux, Programme, Snapshot, Social, Track, UpdateBatch};
