//! Wire protocol for the upstream stats server.
//!
//! The protocol is newline-delimited text. Outbound lines are opaque
//! command strings ("subscribe overview", and so on - the vocabulary is
//! defined by the server). Inbound lines start with a status token:
//!
//! ```text
//! OK
//! ACK
//! DATA <command> <payload>
//! ```
//!
//! `DATA` lines carry the command the payload answers, then the payload
//! blob (typically JSON) as the rest of the line. Anything else decodes
//! to [`Message::Unknown`] so the caller can log and drop it without
//! tearing down the connection.

use std::fmt;

use anyhow::{bail, Result};

/// A named upstream subscription or query, sent as a single text line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(String);

impl Command {
    /// Create a command from its wire text.
    ///
    /// Fails if the text contains a newline, which would corrupt the
    /// line framing.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.contains('\n') || text.contains('\r') {
            bail!("command must not contain line breaks: {:?}", text);
        }
        Ok(Self(text))
    }

    /// The command text without framing.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode the command as one newline-terminated line.
    pub fn serialize(&self) -> String {
        format!("{}\n", self.0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded inbound line from the stats server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Command accepted.
    Ok,
    /// Command rejected by the server.
    Ack,
    /// A data tick for a registered command.
    Data { command: Command, payload: String },
    /// Unparseable line or unrecognized status token.
    Unknown { raw: String },
}

impl Message {
    /// Decode one inbound line (without its trailing newline).
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut tokens = line.splitn(3, ' ');

        match tokens.next() {
            Some("OK") => Message::Ok,
            Some("ACK") => Message::Ack,
            Some("DATA") => {
                let command = tokens.next().filter(|c| !c.is_empty());
                let payload = tokens.next().unwrap_or_default();
                match command.and_then(|c| Command::new(c).ok()) {
                    Some(command) => Message::Data {
                        command,
                        payload: payload.to_string(),
                    },
                    // DATA with no command token is not dispatchable
                    None => Message::Unknown {
                        raw: line.to_string(),
                    },
                }
            }
            _ => Message::Unknown {
                raw: line.to_string(),
            },
        }
    }

    /// Short status label for logging.
    pub fn status(&self) -> &'static str {
        match self {
            Message::Ok => "OK",
            Message::Ack => "ACK",
            Message::Data { .. } => "DATA",
            Message::Unknown { .. } => "unknown",
        }
    }
}
