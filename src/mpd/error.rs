//! Error taxonomy for the MPD client

use std::num::ParseIntError;
use thiserror::Error;

/// Errors raised by the transport, the command client and the idle watcher.
///
/// `Connect`, `ConnectTimeout` and `BadGreeting` only happen while dialing.
/// `Io` and `Closed` mean the session is gone; there is no reconnect.
/// `Protocol` means a reply did not match the grammar of the issued command.
/// The rest of that reply is read and discarded before the error is returned,
/// so the connection stays usable for the next command.
#[derive(Debug, Error)]
pub enum MpdError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("{addr} is not an MPD server (greeting: {greeting:?})")]
    BadGreeting { addr: String, greeting: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("{command}: unexpected reply {line:?}")]
    Protocol { command: &'static str, line: String },

    /// A counter sticker that is not a number, or cannot be incremented.
    #[error("sticker {name:?} on {uri:?} is not a usable counter: {value:?}")]
    DataFormat {
        uri: String,
        name: String,
        value: String,
        #[source]
        source: Option<ParseIntError>,
    },
}

impl MpdError {
    pub(crate) fn protocol(command: &'static str, line: impl Into<String>) -> Self {
        MpdError::Protocol {
            command,
            line: line.into(),
        }
    }

    /// True when the session can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, MpdError::Io(_) | MpdError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, MpdError>;
