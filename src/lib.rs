//! MPD playcount tracker
//!
//! This library provides:
//! - An MPD protocol client with pipelined command ids and idle/noidle handling
//! - Idle notifications on a dedicated connection with one-shot subscribers
//! - A playcount service that stores per-song play counters as stickers

pub mod bus;
pub mod config;
pub mod mpd;
pub mod services;
