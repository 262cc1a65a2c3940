//! Line transport for the MPD protocol
//!
//! Dials the daemon, checks the `OK MPD <version>` greeting and exposes the
//! socket as two halves: a [`LineWriter`] that issues commands and hands out
//! increasing [`CommandId`]s, and a [`LineReader`] that reads reply lines.
//!
//! Several commands may be written before their replies are read. Replies
//! are bracketed with [`LineReader::start_response`] / [`LineReader::end_response`]
//! and must be resolved in the order the commands were issued.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::error::{MpdError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const GREETING_PREFIX: &str = "OK MPD";

/// Sequence id of an issued command.
pub type CommandId = u64;

/// Reading half of a connection.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    next_response: CommandId,
    active: Option<CommandId>,
    line: String,
}

impl LineReader {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            next_response: 0,
            active: None,
            line: String::new(),
        }
    }

    /// Read one line, without its terminator.
    pub async fn read_line(&mut self) -> Result<String> {
        self.line.clear();
        let n = self.inner.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(MpdError::Closed);
        }
        let trimmed = self.line.trim_end_matches(['\n', '\r']);
        Ok(trimmed.to_string())
    }

    /// Begin consuming the reply of command `id`.
    ///
    /// Panics if `id` is not the oldest unresolved command or another reply
    /// is still being consumed.
    pub fn start_response(&mut self, id: CommandId) {
        assert!(
            self.active.is_none(),
            "response {} started while {:?} is still open",
            id,
            self.active
        );
        assert_eq!(
            id, self.next_response,
            "responses must be consumed in issue order"
        );
        self.active = Some(id);
    }

    /// Finish consuming the reply of command `id`.
    pub fn end_response(&mut self, id: CommandId) {
        assert_eq!(
            self.active,
            Some(id),
            "end_response({}) does not match the open response",
            id
        );
        self.active = None;
        self.next_response += 1;
    }
}

/// Writing half of a connection.
pub struct LineWriter {
    inner: OwnedWriteHalf,
    next_request: CommandId,
}

impl LineWriter {
    fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: write_half,
            next_request: 0,
        }
    }

    /// Write a raw line that carries no reply of its own (`noidle`, `close`).
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a command and return the id its reply is bracketed with.
    pub async fn send_command(&mut self, command: &str) -> Result<CommandId> {
        self.write_line(command).await?;
        let id = self.next_request;
        self.next_request += 1;
        Ok(id)
    }

    /// Shut down the write direction of the socket.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A dialed connection that passed the greeting check.
pub struct Connection {
    host: String,
    port: u16,
    version: String,
    pub(crate) reader: LineReader,
    pub(crate) writer: LineWriter,
}

impl Connection {
    /// Dial `host:port` and validate the greeting line.
    pub async fn dial(host: &str, port: u16) -> Result<Self> {
        Self::dial_within(host, port, CONNECT_TIMEOUT).await
    }

    /// Dial with `limit` applying to both the TCP connect and the greeting.
    pub(crate) async fn dial_within(host: &str, port: u16, limit: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = timeout(limit, TcpStream::connect(&addr))
            .await
            .map_err(|_| MpdError::ConnectTimeout { addr: addr.clone() })?
            .map_err(|source| MpdError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = LineReader::new(read_half);

        // A listener that accepts but never greets is not a daemon
        let greeting = timeout(limit, reader.read_line())
            .await
            .map_err(|_| MpdError::ConnectTimeout { addr: addr.clone() })??;
        let version = parse_greeting(&greeting).ok_or_else(|| MpdError::BadGreeting {
            addr: addr.clone(),
            greeting: greeting.clone(),
        })?;

        info!("Connected to MPD {} at {}", version, addr);

        Ok(Self {
            host: host.to_string(),
            port,
            version: version.to_string(),
            reader,
            writer: LineWriter::new(write_half),
        })
    }

    /// Open a second socket to the same endpoint.
    pub async fn duplicate(&self) -> Result<Self> {
        debug!("Duplicating connection to {}", self.addr());
        Self::dial(&self.host, self.port).await
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Protocol version announced in the greeting.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Split into halves so the reader can block while another task writes.
    pub fn into_split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

fn parse_greeting(line: &str) -> Option<&str> {
    line.strip_prefix(GREETING_PREFIX).map(str::trim)
}
