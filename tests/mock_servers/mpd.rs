#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock MPD daemon for testing
//!
//! Speaks the line protocol over TCP: greeting, status/currentsong, stickers,
//! client-to-client channels and idle/noidle. Subsystem changes are injected
//! with [`MockMpdServer::notify`].

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const GREETING: &str = "OK MPD 0.23.5\n";

/// Per-connection channel state
#[derive(Debug, Default)]
struct ClientChannels {
    subscribed: HashSet<String>,
    inbox: Vec<(String, String)>,
}

/// Mock MPD state
#[derive(Debug, Default)]
pub struct MockMpdState {
    pub status: Vec<(String, String)>,
    pub current_song: Vec<(String, String)>,
    /// (uri, name) -> value
    pub stickers: HashMap<(String, String), String>,
    /// Every line received, in order, across all connections
    pub commands: Vec<String>,
    clients: HashMap<usize, ClientChannels>,
    next_client: usize,
}

/// Mock MPD server
pub struct MockMpdServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockMpdState>>,
    events: broadcast::Sender<String>,
    kill: CancellationToken,
    handle: JoinHandle<()>,
}

impl MockMpdServer {
    /// Start a mock MPD server on a random port, stopped player, empty queue
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockMpdState::default()));
        let (events, _) = broadcast::channel(64);
        let kill = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Self {
            addr,
            state: state.clone(),
            events: events.clone(),
            kill: kill.clone(),
            handle: tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            let state = state.clone();
                            let events = events.subscribe();
                            let kill = kill.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, state, events, kill).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            }),
        };
        server.stop_playback().await;
        server
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Replace the `status` reply
    pub async fn set_status(&self, pairs: &[(&str, &str)]) {
        self.state.write().await.status = to_pairs(pairs);
    }

    /// Replace the `currentsong` reply
    pub async fn set_current_song(&self, pairs: &[(&str, &str)]) {
        self.state.write().await.current_song = to_pairs(pairs);
    }

    /// Play `file` as song `songid` at `elapsed` of `total` seconds
    pub async fn play(&self, songid: u32, file: &str, title: &str, elapsed: u32, total: u32) {
        let id = songid.to_string();
        let time = format!("{}:{}", elapsed, total);
        self.set_status(&[
            ("volume", "80"),
            ("state", "play"),
            ("song", "0"),
            ("songid", &id),
            ("time", &time),
        ])
        .await;
        self.set_current_song(&[("file", file), ("Title", title), ("Id", &id)])
            .await;
    }

    /// Move the play position of the current song
    pub async fn seek(&self, elapsed: u32, total: u32) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.status.iter_mut().find(|(k, _)| k == "time") {
            entry.1 = format!("{}:{}", elapsed, total);
        }
    }

    /// Stop playback and clear the current song
    pub async fn stop_playback(&self) {
        self.set_status(&[("volume", "80"), ("state", "stop")]).await;
        self.set_current_song(&[]).await;
    }

    pub async fn set_sticker(&self, uri: &str, name: &str, value: &str) {
        self.state
            .write()
            .await
            .stickers
            .insert((uri.to_string(), name.to_string()), value.to_string());
    }

    pub async fn sticker(&self, uri: &str, name: &str) -> Option<String> {
        self.state
            .read()
            .await
            .stickers
            .get(&(uri.to_string(), name.to_string()))
            .cloned()
    }

    /// Report a subsystem change to every connection (delivered while idling)
    pub fn notify(&self, subsystem: &str) {
        let _ = self.events.send(subsystem.to_string());
    }

    /// Hang up on every client, as a crashing daemon would
    pub async fn drop_connections(&self) {
        self.kill.cancel();
    }

    /// All command lines received so far
    pub async fn commands(&self) -> Vec<String> {
        self.state.read().await.commands.clone()
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn to_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Split a command line into words, honouring quotes and backslash escapes
pub fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    '"' => break,
                    other => word.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    words
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RwLock<MockMpdState>>,
    mut events: broadcast::Receiver<String>,
    kill: CancellationToken,
) {
    let client_id = {
        let mut s = state.write().await;
        let id = s.next_client;
        s.next_client += 1;
        s.clients.insert(id, ClientChannels::default());
        id
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    if writer.write_all(GREETING.as_bytes()).await.is_err() {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = kill.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim().to_string();
        state.write().await.commands.push(command.clone());
        let words = tokenize(&command);
        let name = words.first().map(String::as_str).unwrap_or("");

        let reply = match name {
            "idle" => match wait_idle(&words[1..], &mut reader, &mut events, &state, &kill).await {
                Some(reply) => reply,
                None => break,
            },
            // Outside idle, noidle is ignored
            "noidle" => continue,
            "close" => break,
            _ => process_command(name, &words[1..], client_id, &state).await,
        };

        if writer.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }

    state.write().await.clients.remove(&client_id);
}

/// Block until a matching event or `noidle`. None when the client went away.
async fn wait_idle(
    filter: &[String],
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    events: &mut broadcast::Receiver<String>,
    state: &Arc<RwLock<MockMpdState>>,
    kill: &CancellationToken,
) -> Option<String> {
    let mut next = String::new();
    loop {
        tokio::select! {
            _ = kill.cancelled() => return None,
            read = reader.read_line(&mut next) => {
                match read {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {
                        let command = next.trim().to_string();
                        state.write().await.commands.push(command.clone());
                        if command == "noidle" {
                            return Some("OK\n".to_string());
                        }
                        return Some("ACK [2@0] {idle} only noidle is allowed while idle\n".to_string());
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(subsystem) if filter.is_empty() || filter.contains(&subsystem) => {
                        return Some(format!("changed: {}\nOK\n", subsystem));
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }
}

async fn process_command(
    name: &str,
    args: &[String],
    client_id: usize,
    state: &Arc<RwLock<MockMpdState>>,
) -> String {
    let mut s = state.write().await;
    match (name, args) {
        ("status", []) => block(&s.status),
        ("currentsong", []) => block(&s.current_song),
        ("sticker", [op, _ty, uri, sticker]) if op == "get" => {
            match s.stickers.get(&(uri.clone(), sticker.clone())) {
                Some(value) => format!("sticker: {}={}\nOK\n", sticker, value),
                None => "ACK [50@0] {sticker} no such sticker\n".to_string(),
            }
        }
        ("sticker", [op, _ty, uri, sticker, value]) if op == "set" => {
            s.stickers
                .insert((uri.clone(), sticker.clone()), value.clone());
            "OK\n".to_string()
        }
        ("subscribe", [channel]) => {
            let client = s.clients.entry(client_id).or_default();
            if client.subscribed.insert(channel.clone()) {
                "OK\n".to_string()
            } else {
                "ACK [56@0] {subscribe} already subscribed to this channel\n".to_string()
            }
        }
        ("unsubscribe", [channel]) => {
            let client = s.clients.entry(client_id).or_default();
            if client.subscribed.remove(channel) {
                "OK\n".to_string()
            } else {
                "ACK [50@0] {unsubscribe} not subscribed to this channel\n".to_string()
            }
        }
        ("sendmessage", [channel, text]) => {
            let mut delivered = false;
            for client in s.clients.values_mut() {
                if client.subscribed.contains(channel) {
                    client.inbox.push((channel.clone(), text.clone()));
                    delivered = true;
                }
            }
            if delivered {
                "OK\n".to_string()
            } else {
                "ACK [50@0] {sendmessage} nobody is subscribed to this channel\n".to_string()
            }
        }
        ("readmessages", []) => {
            let client = s.clients.entry(client_id).or_default();
            let mut reply = String::new();
            for (channel, message) in client.inbox.drain(..) {
                reply.push_str(&format!("channel: {}\nmessage: {}\n", channel, message));
            }
            reply.push_str("OK\n");
            reply
        }
        _ => format!("ACK [5@0] {{{}}} unknown command\n", name),
    }
}

fn block(pairs: &[(String, String)]) -> String {
    let mut reply = String::new();
    for (key, value) in pairs {
        reply.push_str(&format!("{}: {}\n", key, value));
    }
    reply.push_str("OK\n");
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_quoted_args() {
        assert_eq!(
            tokenize(r#"sticker get "song" "a \"b\".mp3" "playcount""#),
            vec!["sticker", "get", "song", "a \"b\".mp3", "playcount"]
        );
        assert_eq!(tokenize("idle player mixer"), vec!["idle", "player", "mixer"]);
        assert!(tokenize("").is_empty());
    }

    #[tokio::test]
    async fn mock_mpd_greets() {
        let server = MockMpdServer::start().await;

        let stream = TcpStream::connect(server.addr()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut greeting = String::new();
        reader.read_line(&mut greeting).await.unwrap();
        assert_eq!(greeting, GREETING);

        server.stop().await;
    }
}
