//! Mock servers for integration testing
//!
//! A scripted MPD daemon that lets the client, idle watcher and playcount
//! tracker run end to end without a real music player daemon.

pub mod mpd;

pub use mpd::MockMpdServer;
