//! Reconnecting TCP client for the upstream stats server.
//!
//! Maintains exactly one outstanding connection. Inbound newline-delimited
//! lines are decoded and dispatched into the owned [`CommandRegistry`];
//! outbound commands flow through the sink the registry is handed on each
//! connect. On any disconnect the client schedules exactly one reconnect
//! attempt after a fixed delay - never an immediate retry, to avoid
//! reconnect storms - and tells the registry to resend its subscriptions
//! once the link is back.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::registry::CommandRegistry;
use crate::protocol::Message;

/// Default wait before reconnecting after a disconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Reconnecting line-protocol client, owner of the socket and registry.
pub struct StatsClient {
    host: String,
    port: u16,
    reconnect_delay: Duration,
    registry: CommandRegistry,
}

impl StatsClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        reconnect_delay: Duration,
        registry: CommandRegistry,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect_delay,
            registry,
        }
    }

    /// Run the client in a background task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect, serve and reconnect forever.
    ///
    /// Transport errors never surface to listeners; they only show up as
    /// a data gap while the reconnect delay elapses.
    pub async fn run(mut self) {
        let mut reconnect = false;

        loop {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    info!(host = %self.host, port = self.port, "stats client connected");
                    let (reader, writer) = stream.into_split();
                    let reason =
                        serve_connection(reader, writer, &mut self.registry, reconnect).await;
                    error!(%reason, "stats client disconnected");
                    self.registry.disconnected();
                }
                Err(e) => {
                    error!(host = %self.host, port = self.port, error = %e, "connection failed");
                }
            }

            reconnect = true;
            info!(
                host = %self.host,
                port = self.port,
                delay_secs = self.reconnect_delay.as_secs_f64(),
                "scheduling stats client reconnection"
            );
            sleep(self.reconnect_delay).await;
        }
    }
}

/// Service one established connection until it drops.
///
/// Factored over generic halves so tests can drive it with an in-memory
/// duplex instead of a socket. Returns the human-readable disconnect
/// reason. A malformed line decodes to [`Message::Unknown`] and is logged
/// by the registry; the connection stays open.
pub(crate) async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    registry: &mut CommandRegistry,
    reconnect: bool,
) -> String
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut outbound) = mpsc::unbounded_channel();
    registry.connected(sink, reconnect);

    // Writes run beside the read loop so a slow peer cannot stall
    // inbound dispatch.
    let writer_task = tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            if let Err(e) = writer.write_all(command.serialize().as_bytes()).await {
                error!(%command, error = %e, "write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "connection closed".to_string(),
            Ok(_) => {
                debug!(line = %line.trim_end(), "received line");
                registry.on_message(Message::parse(&line));
            }
            Err(e) => break format!("read error: {}", e),
        }
    };

    writer_task.abort();
    reason
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::Command;

    fn recording_registry(command: &str) -> (Arc<Mutex<Vec<Value>>>, CommandRegistry) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = CommandRegistry::new();
        registry.register(Command::new(command).unwrap(), move |value: &Value| {
            sink.lock().push(value.clone());
            Ok(())
        });
        (seen, registry)
    }

    #[tokio::test]
    async fn test_data_lines_are_dispatched() {
        let (seen, mut registry) = recording_registry("minute");
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_io);
        let (_server_reader, mut server_writer) = tokio::io::split(server_io);

        let feeder = tokio::spawn(async move {
            server_writer
                .write_all(b"OK\nDATA minute {\"n\":1}\nDATA minute {\"n\":2}\n")
                .await
                .unwrap();
            // Split halves keep the duplex alive; signal EOF explicitly
            server_writer.shutdown().await.unwrap();
        });

        let reason = serve_connection(reader, writer, &mut registry, false).await;
        feeder.await.unwrap();

        assert_eq!(reason, "connection closed");
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(seen.lock()[1], serde_json::json!({"n":2}));
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_connection_open() {
        let (seen, mut registry) = recording_registry("minute");
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_io);
        let (_server_reader, mut server_writer) = tokio::io::split(server_io);

        let feeder = tokio::spawn(async move {
            server_writer
                .write_all(b"complete garbage\nDATA minute {\"n\":7}\n")
                .await
                .unwrap();
            server_writer.shutdown().await.unwrap();
        });

        serve_connection(reader, writer, &mut registry, false).await;
        feeder.await.unwrap();

        // The line after the garbage was still dispatched
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0], serde_json::json!({"n":7}));
    }

    #[tokio::test]
    async fn test_queued_command_written_on_connect() {
        let (_seen, mut registry) = recording_registry("overview");
        let (client_io, server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_io);
        let (mut server_reader, server_writer) = tokio::io::split(server_io);

        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = server_reader.read(&mut buf).await.unwrap();
            drop(server_writer);
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        serve_connection(reader, writer, &mut registry, false).await;
        let written = peer.await.unwrap();
        assert_eq!(written, "overview\n");
    }

    #[tokio::test]
    async fn test_resend_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (_seen, registry) = recording_registry("overview");
        let client =
            StatsClient::new(addr.ip().to_string(), addr.port(), Duration::from_millis(50), registry);
        let handle = client.spawn();

        // First connection: the queued command arrives, then we drop the
        // socket to force the disconnect path.
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"overview\n");
        drop(stream);

        // After the reconnect delay the client comes back and resends.
        let (mut stream, _) = listener.accept().await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"overview\n");

        handle.abort();
    }
}
