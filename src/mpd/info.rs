//! Reply model: key/value blocks, channel messages and reply line grammar

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use super::error::{MpdError, Result};
use super::transport::LineReader;

/// Line that terminates every successful reply.
pub const OK_LINE: &str = "OK";
const FIELD_SEP: &str = ": ";
const ERROR_MARKER: &str = "ACK";

fn sticker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sticker: (.+?)=(.*)$").expect("valid sticker regex"))
}

fn channel_message_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^channel: (.+)\nmessage: (.+)$").expect("valid channel message regex")
    })
}

/// One parsed multi-line reply block (`status`, `currentsong`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info(HashMap<String, String>);

impl Info {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key: value` line. Everything after the first separator is the value.
    pub fn add_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let (key, value) = line
            .split_once(FIELD_SEP)
            .ok_or_else(|| line.to_string())?;
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn song_id(&self) -> Option<&str> {
        self.get("songid")
    }

    pub fn state(&self) -> PlayState {
        PlayState::parse(self.get("state").unwrap_or_default())
    }

    pub fn file(&self) -> Option<&str> {
        self.get("file")
    }

    pub fn title(&self) -> Option<&str> {
        self.get("Title")
    }

    /// Elapsed and total seconds of the current song, `(0, 0)` when unknown.
    ///
    /// Reads `time: <elapsed>:<total>`, falling back to the separate
    /// `elapsed`/`duration` fields. Fractions are truncated.
    pub fn progress(&self) -> (u64, u64) {
        if let Some(time) = self.get("time") {
            return time
                .split_once(':')
                .and_then(|(elapsed, total)| Some((parse_secs(elapsed)?, parse_secs(total)?)))
                .unwrap_or((0, 0));
        }
        match (self.get("elapsed"), self.get("duration")) {
            (Some(elapsed), Some(total)) => match (parse_secs(elapsed), parse_secs(total)) {
                (Some(e), Some(t)) => (e, t),
                _ => (0, 0),
            },
            _ => (0, 0),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Info {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn parse_secs(s: &str) -> Option<u64> {
    let secs: f64 = s.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs as u64)
    } else {
        None
    }
}

/// Player state as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Play,
    Pause,
    Stop,
    Unknown,
}

impl PlayState {
    pub fn parse(s: &str) -> Self {
        match s {
            "play" => PlayState::Play,
            "pause" => PlayState::Pause,
            "stop" => PlayState::Stop,
            _ => PlayState::Unknown,
        }
    }
}

/// A message read from a client-to-client channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub message: String,
}

/// Whether a reply line is an `ACK` error.
pub fn is_error_line(line: &str) -> bool {
    line.contains(ERROR_MARKER)
}

/// Parse `sticker: <name>=<value>` into `(name, value)`.
pub fn parse_sticker_line(line: &str) -> Option<(&str, &str)> {
    let caps = sticker_regex().captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Parse the `channel:` / `message:` line pair.
pub fn parse_channel_message(channel_line: &str, message_line: &str) -> Option<ChannelMessage> {
    let joined = format!("{}\n{}", channel_line, message_line);
    let caps = channel_message_regex().captures(&joined)?;
    Some(ChannelMessage {
        channel: caps.get(1)?.as_str().to_string(),
        message: caps.get(2)?.as_str().to_string(),
    })
}

/// Quote a command argument, escaping `\` and `"`.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Whether `line` terminates a reply, successfully or not.
fn ends_reply(line: &str) -> bool {
    line == OK_LINE || line.starts_with(ERROR_MARKER)
}

/// Build the error for a reply line that broke the grammar of `command`.
///
/// Reads and discards the remainder of the reply first, so the next command
/// starts on its own reply. Nothing is read when `line` already ended it.
pub(crate) async fn reject(
    reader: &mut LineReader,
    command: &'static str,
    line: String,
) -> MpdError {
    if !ends_reply(&line) {
        loop {
            match reader.read_line().await {
                Ok(rest) if ends_reply(&rest) => break,
                Ok(rest) => debug!("{}: discarding {:?}", command, rest),
                Err(e) => return e,
            }
        }
    }
    MpdError::protocol(command, line)
}

/// Read `key: value` lines into an [`Info`] until the `OK` line.
pub(crate) async fn read_info(reader: &mut LineReader, command: &'static str) -> Result<Info> {
    let mut info = Info::new();
    loop {
        let line = reader.read_line().await?;
        if line == OK_LINE {
            return Ok(info);
        }
        if let Err(line) = info.add_line(&line) {
            return Err(reject(reader, command, line).await);
        }
    }
}

/// Read the reply of an `idle` command: zero or more `changed:` lines, then `OK`.
pub(crate) async fn read_idle_reply(reader: &mut LineReader) -> Result<Vec<String>> {
    let mut changed = Vec::new();
    loop {
        let line = reader.read_line().await?;
        if line == OK_LINE {
            return Ok(changed);
        }
        match line.strip_prefix("changed: ") {
            Some(subsystem) => changed.push(subsystem.to_string()),
            None => return Err(reject(reader, "idle", line).await),
        }
    }
}

/// Read a reply that must be exactly one `OK` line.
pub(crate) async fn read_ok(reader: &mut LineReader, command: &'static str) -> Result<()> {
    let line = reader.read_line().await?;
    if line == OK_LINE {
        Ok(())
    } else {
        Err(reject(reader, command, line).await)
    }
}
