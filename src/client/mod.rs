//! Upstream transport side: the TCP client and the command registry.
//!
//! The registry is created first and seeded with listeners (the relay
//! installs one for the aggregate command), then moved into the client,
//! whose connection task becomes the sole owner and mutator of registry
//! state. Commands registered while disconnected queue up and flush on
//! the first connect; reconnects resend every active subscription.

mod registry;
mod transport;

pub use registry::{CommandRegistry, CommandSink, Listener};
pub use transport::{StatsClient, DEFAULT_RECONNECT_DELAY};
