//! MPD command client
//!
//! Issues commands on a single [`Connection`] and parses their replies.
//!
//! A connection is either NORMAL or WAITING. WAITING means an `idle` command
//! was written and its reply is still pending; the daemon would read anything
//! written next as part of that wait. [`MpdClient::cmd`] therefore interrupts
//! the wait with `noidle` and drains the pending reply before writing the new
//! command, so callers never see wait output in a command's reply.

use tracing::{debug, warn};

use super::error::{MpdError, Result};
use super::info::{
    is_error_line, parse_channel_message, parse_sticker_line, quote, read_idle_reply, read_info,
    read_ok, reject, ChannelMessage, Info, OK_LINE,
};
use super::transport::{CommandId, Connection};

/// Sticker type for song annotations.
pub const STICKER_SONG_TYPE: &str = "song";

const NO_SUCH_STICKER: &str = "no such sticker";

/// Logical mode of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Blocked in `idle`; the reply to this command id is pending.
    Waiting(CommandId),
}

pub struct MpdClient {
    conn: Connection,
    mode: Mode,
    closed: bool,
}

impl MpdClient {
    /// Connect to the daemon at `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let conn = Connection::dial(host, port).await?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            mode: Mode::Normal,
            closed: false,
        }
    }

    /// Open a second connection to the same daemon.
    pub async fn duplicate(&self) -> Result<Connection> {
        self.conn.duplicate().await
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn server_version(&self) -> &str {
        self.conn.version()
    }

    pub fn addr(&self) -> String {
        self.conn.addr()
    }

    /// Write `text` as a command and return the id its reply is bracketed with.
    ///
    /// Interrupts a pending wait first.
    pub async fn cmd(&mut self, text: &str) -> Result<CommandId> {
        if self.closed {
            return Err(MpdError::Closed);
        }
        self.interrupt().await?;
        debug!("cmd: {}", text);
        self.conn.writer.send_command(text).await
    }

    pub fn start_response(&mut self, id: CommandId) {
        self.conn.reader.start_response(id);
    }

    pub fn end_response(&mut self, id: CommandId) {
        self.conn.reader.end_response(id);
    }

    /// Leave WAITING mode, if in it. Returns the subsystems the wait reported.
    async fn interrupt(&mut self) -> Result<Vec<String>> {
        let Mode::Waiting(id) = self.mode else {
            return Ok(Vec::new());
        };

        debug!("Interrupting idle ({})", id);
        self.conn.writer.write_line("noidle").await?;

        self.start_response(id);
        let changed = read_idle_reply(&mut self.conn.reader).await;
        self.end_response(id);
        self.mode = Mode::Normal;

        let changed = changed?;
        if !changed.is_empty() {
            debug!("Idle interrupted after changes: {:?}", changed);
        }
        Ok(changed)
    }

    /// Enter WAITING mode on this connection. An empty list waits on any subsystem.
    pub async fn idle(&mut self, subsystems: &[&str]) -> Result<CommandId> {
        let mut command = String::from("idle");
        for subsystem in subsystems {
            command.push(' ');
            command.push_str(subsystem);
        }
        let id = self.cmd(&command).await?;
        self.mode = Mode::Waiting(id);
        Ok(id)
    }

    /// Block until the pending wait reports. Returns the changed subsystems.
    ///
    /// Returns an empty list when not waiting.
    pub async fn wait_idle(&mut self) -> Result<Vec<String>> {
        let Mode::Waiting(id) = self.mode else {
            return Ok(Vec::new());
        };

        self.start_response(id);
        let changed = read_idle_reply(&mut self.conn.reader).await;
        self.end_response(id);
        self.mode = Mode::Normal;
        changed
    }

    async fn info_command(&mut self, command: &'static str) -> Result<Info> {
        let id = self.cmd(command).await?;
        self.start_response(id);
        let info = read_info(&mut self.conn.reader, command).await;
        self.end_response(id);
        info
    }

    async fn ok_command(&mut self, name: &'static str, text: &str) -> Result<()> {
        let id = self.cmd(text).await?;
        self.start_response(id);
        let result = read_ok(&mut self.conn.reader, name).await;
        self.end_response(id);
        result
    }

    /// Player status (`state`, `songid`, `time`, ...).
    pub async fn status(&mut self) -> Result<Info> {
        self.info_command("status").await
    }

    /// Metadata of the current song; empty when nothing is queued.
    pub async fn current_song(&mut self) -> Result<Info> {
        self.info_command("currentsong").await
    }

    /// Read a sticker. A missing sticker reads as the empty string.
    pub async fn sticker_get(&mut self, sticker_type: &str, uri: &str, name: &str) -> Result<String> {
        let text = format!(
            "sticker get {} {} {}",
            quote(sticker_type),
            quote(uri),
            quote(name)
        );
        let id = self.cmd(&text).await?;
        self.start_response(id);
        let result = self.read_sticker_reply().await;
        self.end_response(id);
        result
    }

    async fn read_sticker_reply(&mut self) -> Result<String> {
        let line = self.conn.reader.read_line().await?;

        let value = match parse_sticker_line(&line) {
            Some((_, value)) => value.to_string(),
            // Error replies are a single line, no OK follows
            None if is_error_line(&line) && line.contains(NO_SUCH_STICKER) => {
                return Ok(String::new());
            }
            None => {
                warn!("sticker get failed: {}", line);
                return Err(reject(&mut self.conn.reader, "sticker get", line).await);
            }
        };

        let ok_line = self.conn.reader.read_line().await?;
        if ok_line != OK_LINE {
            return Err(reject(&mut self.conn.reader, "sticker get", ok_line).await);
        }
        Ok(value)
    }

    /// Write a sticker.
    pub async fn sticker_set(
        &mut self,
        sticker_type: &str,
        uri: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let text = format!(
            "sticker set {} {} {} {}",
            quote(sticker_type),
            quote(uri),
            quote(name),
            quote(value)
        );
        self.ok_command("sticker set", &text).await
    }

    /// Subscribe this client to a message channel.
    pub async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let text = format!("subscribe {}", quote(channel));
        self.ok_command("subscribe", &text).await
    }

    pub async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let text = format!("unsubscribe {}", quote(channel));
        self.ok_command("unsubscribe", &text).await
    }

    pub async fn send_message(&mut self, channel: &str, text: &str) -> Result<()> {
        let command = format!("sendmessage {} {}", quote(channel), quote(text));
        self.ok_command("sendmessage", &command).await
    }

    /// Read all pending messages on subscribed channels.
    pub async fn read_messages(&mut self) -> Result<Vec<ChannelMessage>> {
        let id = self.cmd("readmessages").await?;
        self.start_response(id);
        let result = self.read_message_pairs().await;
        self.end_response(id);
        result
    }

    async fn read_message_pairs(&mut self) -> Result<Vec<ChannelMessage>> {
        let mut messages = Vec::new();
        loop {
            let channel_line = self.conn.reader.read_line().await?;
            if channel_line == OK_LINE {
                return Ok(messages);
            }
            // Error replies are a single line
            if is_error_line(&channel_line) {
                warn!("readmessages failed: {}", channel_line);
                return Err(MpdError::protocol("readmessages", channel_line));
            }
            let message_line = self.conn.reader.read_line().await?;
            if let Some(message) = parse_channel_message(&channel_line, &message_line) {
                messages.push(message);
                continue;
            }
            let err = reject(&mut self.conn.reader, "readmessages", message_line).await;
            return Err(match err {
                MpdError::Protocol { command, line } => MpdError::Protocol {
                    command,
                    line: format!("{}\n{}", channel_line, line),
                },
                other => other,
            });
        }
    }

    /// Leave WAITING mode, say goodbye and shut the socket down.
    ///
    /// Later commands fail with [`MpdError::Closed`].
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.interrupt().await?;
        debug!("Closing connection to {}", self.conn.addr());
        self.conn.writer.write_line("close").await?;
        self.conn.writer.shutdown().await
    }
}
