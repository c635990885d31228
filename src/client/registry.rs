//! Subscription registry bridging the TCP client and interested consumers.
//!
//! Consumers register listeners for upstream commands. The registry sends
//! each distinct command upstream once (queueing it while no connection
//! exists), caches the last `DATA` payload per command and fans ticks out
//! to every listener. A cached payload is replayed synchronously to any
//! listener that registers later, so no subscriber waits a full upstream
//! interval for its first value.
//!
//! The registry is owned by the connection task after wiring and is only
//! mutated there; one inbound line is fully dispatched before the next.
//! Listeners must not re-enter [`CommandRegistry::register`] for the
//! command currently being dispatched.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::protocol::{Command, Message};

/// Callback invoked with each decoded `DATA` payload for a command.
///
/// A listener returning `Err` is logged and isolated: it never stops
/// fan-out to the remaining listeners and never corrupts the cache.
pub type Listener = Box<dyn FnMut(&Value) -> anyhow::Result<()> + Send>;

/// Handle used to push commands to the live connection.
pub type CommandSink = mpsc::UnboundedSender<Command>;

/// Tracks active subscriptions, caches last values and fans out ticks.
#[derive(Default)]
pub struct CommandRegistry {
    /// Ordered listener list per command.
    listeners: HashMap<Command, Vec<Listener>>,
    /// Last `DATA` payload per command, for replay-on-subscribe.
    cache: HashMap<Command, Value>,
    /// Commands issued before any connection existed, flushed FIFO.
    pending: VecDeque<Command>,
    /// Outbound path to the current connection, if one exists.
    sink: Option<CommandSink>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a command.
    ///
    /// The first listener for a command triggers the upstream send (or an
    /// enqueue when disconnected). If a cached payload exists, the new
    /// listener is invoked with it before this method returns.
    pub fn register<F>(&mut self, command: Command, listener: F)
    where
        F: FnMut(&Value) -> anyhow::Result<()> + Send + 'static,
    {
        let cached = self.cache.get(&command).cloned();
        let listeners = self.listeners.entry(command.clone()).or_default();
        listeners.push(Box::new(listener));
        let first = listeners.len() == 1;

        if first {
            self.send_command(command.clone());
        }

        if let Some(value) = cached {
            if let Some(replay) = self.listeners.get_mut(&command).and_then(|l| l.last_mut()) {
                if let Err(e) = replay(&value) {
                    error!(%command, error = %e, "listener failed on cached replay");
                }
            }
        }
    }

    /// Commands with at least one current listener.
    pub fn current_commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> =
            self.listeners.iter().filter(|(_, l)| !l.is_empty()).map(|(c, _)| c.clone()).collect();
        commands.sort();
        commands
    }

    /// Last cached payload for a command.
    pub fn cached(&self, command: &Command) -> Option<&Value> {
        self.cache.get(command)
    }

    /// Attach the outbound sink of a fresh connection.
    ///
    /// On a first connect the commands queued while disconnected are
    /// flushed FIFO, exactly once. On a reconnect every command with at
    /// least one listener is resent instead: the server keeps no
    /// subscription state across connections, and resubmission is
    /// idempotent upstream.
    pub fn connected(&mut self, sink: CommandSink, reconnect: bool) {
        self.sink = Some(sink);

        if reconnect {
            // Queued commands are a subset of the registered set; drop the
            // queue so the resend below cannot duplicate them.
            self.pending.clear();
            for command in self.current_commands() {
                info!(%command, "resending command after reconnect");
                self.send_command(command);
            }
        } else {
            while let Some(command) = self.pending.pop_front() {
                debug!(%command, "flushing queued command");
                self.send_command(command);
            }
        }
    }

    /// Drop the outbound sink when the connection is lost.
    pub fn disconnected(&mut self) {
        self.sink = None;
    }

    /// Dispatch one decoded inbound message.
    pub fn on_message(&mut self, message: Message) {
        debug!(status = message.status(), "registry received message");

        match message {
            Message::Ok => {}
            Message::Ack => {
                // Upstream rejection: the command stays registered and is
                // only retried by the blanket resend on reconnect.
                error!("command rejected by stats server (ACK)");
            }
            Message::Data { command, payload } => match serde_json::from_str::<Value>(&payload) {
                Ok(value) => self.notify(&command, value),
                Err(e) => {
                    error!(%command, error = %e, "dropping DATA line with undecodable payload");
                }
            },
            Message::Unknown { raw } => {
                error!(line = %raw, "unexpected message from stats server");
            }
        }
    }

    fn notify(&mut self, command: &Command, value: Value) {
        self.cache.insert(command.clone(), value.clone());

        let Some(listeners) = self.listeners.get_mut(command) else {
            debug!(%command, "data tick for command with no listeners");
            return;
        };

        for listener in listeners.iter_mut() {
            if let Err(e) = listener(&value) {
                error!(%command, error = %e, "listener failed, continuing fan-out");
            }
        }
    }

    fn send_command(&mut self, command: Command) {
        match &self.sink {
            Some(sink) => {
                info!(%command, "sending command");
                if sink.send(command.clone()).is_err() {
                    // Writer task already gone; treat as disconnected
                    // and requeue for the next connection.
                    self.sink = None;
                    self.pending.push_back(command);
                }
            }
            None => {
                info!(%command, "no connection, queueing command");
                self.pending.push_back(command);
            }
        }
    }
}
