//! # livedash
//!
//! A relay for near-real-time broadcast audience statistics.
//!
//! The relay keeps one long-lived TCP connection to an upstream
//! statistics server speaking a line-oriented text protocol, subscribes
//! to per-minute audience snapshots on behalf of all dashboard clients,
//! and republishes them over HTTP: a JSON snapshot of the latest data,
//! a server-sent-events stream of minute ticks, and proxied channel
//! discovery and historical endpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Relay                              │
//! │  ┌──────────┐    ┌───────────┐    ┌────────┐    ┌─────────┐ │
//! │  │ client   │───▶│ client    │───▶│ relay  │───▶│  HTTP   │ │
//! │  │(transport)    │(registry) │    │(bridge)│    │ clients │ │
//! │  └────┬─────┘    └───────────┘    └────────┘    └─────────┘ │
//! │       │                                                      │
//! │       ▼                                                      │
//! │  stats server (TCP, newline protocol)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`protocol`]**: The line protocol - commands out, `OK`/`ACK`/`DATA`
//!   status lines in
//! - **[`client`]**: Reconnecting TCP transport and the command registry
//!   that fans `DATA` payloads out to listeners, replays cached data to
//!   late subscribers, and resends subscriptions after a reconnect
//! - **[`relay`]**: The HTTP side - latest snapshot, SSE minute stream,
//!   discovery proxy with title/logo overrides, historical proxy
//! - **[`data`]**: Snapshot decoding, channel filtering with a
//!   latest-per-channel cache, and bounded chart windows with peak and
//!   programme annotations
//! - **[`config`]**: Layered settings from a TOML file and `LIVEDASH_*`
//!   environment variables
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Relay from a local stats server with defaults
//! livedash
//!
//! # Point at a remote server and a config file
//! livedash --config livedash.toml --host stats.example.org --port 7777
//! ```
//!
//! ### As a library
//!
//! ```no_run
//! use livedash::client::{CommandRegistry, StatsClient, DEFAULT_RECONNECT_DELAY};
//! use livedash::protocol::Command;
//!
//! # tokio_test::block_on(async {
//! let mut registry = CommandRegistry::new();
//! registry.register(Command::new("overview")?, |payload| {
//!     println!("minute tick: {payload}");
//!     Ok(())
//! });
//! let client = StatsClient::new("localhost", 7777, DEFAULT_RECONNECT_DELAY, registry);
//! client.run().await;
//! # Ok::<(), anyhow::Error>(())
//! # }).unwrap();
//! ```

pub mod client;
pub mod config;
pub mod data;
pub mod protocol;
pub mod relay;

// Re-export main types for convenience
pub use client::{CommandRegistry, StatsClient};
pub use config::Settings;
pub use data::{SeriesAggregator, Snapshot, StatsProcessor, UpdateBatch};
pub use protocol::{Command, Message};
pub use relay::RelayBridge;
