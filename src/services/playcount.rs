//! Playcount tracker
//!
//! Watches the player and increments a per-song counter sticker once for
//! every song that played (nearly) to its end.
//!
//! ## Event sources
//!
//! ```text
//! poll timer (900ms) ──┐
//!                      ├──▶ update step ──▶ sticker get/set on the primary connection
//! idle "player" ───────┘
//! ```
//!
//! Polling is suppressed while the player is not playing; `player` idle
//! notifications arrive on a dedicated connection and always trigger an
//! update, after which suppression is recomputed from the fresh status.
//!
//! ## Update step
//!
//! 1. Fetch status.
//! 2. If the song id changed, judge the *previous* status: the previous song
//!    counts as played when elapsed and total are nonzero and fewer than
//!    `played_threshold_secs` seconds were left. If so, increment the
//!    sticker of the *previous* current song.
//! 3. Remember the fresh status.
//! 4. Refresh the cached current song.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::config::PlaycountConfig;
use crate::mpd::{IdleWatcher, Info, MpdClient, MpdError, PlayState, STICKER_SONG_TYPE};
use crate::services::traits::{Service, ServiceContext};

/// Default sticker name holding the counter.
pub const PLAYCOUNT_STICKER: &str = "playcount";
/// Default seconds-left threshold under which a song counts as played.
pub const PLAYED_THRESHOLD_SECS: u64 = 10;
/// Default status poll interval while playing.
pub const POLL_INTERVAL: Duration = Duration::from_millis(900);

const PLAYER_SUBSYSTEM: &str = "player";

#[derive(Debug, Clone)]
pub struct PlaycountSettings {
    pub poll_interval: Duration,
    pub played_threshold_secs: u64,
    pub sticker: String,
}

impl Default for PlaycountSettings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            played_threshold_secs: PLAYED_THRESHOLD_SECS,
            sticker: PLAYCOUNT_STICKER.to_string(),
        }
    }
}

impl From<&PlaycountConfig> for PlaycountSettings {
    fn from(config: &PlaycountConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            played_threshold_secs: config.played_threshold_secs,
            sticker: config.sticker.clone(),
        }
    }
}

/// Whether the song described by `status` was played close enough to its end.
pub fn was_played(status: &Info, threshold_secs: u64) -> bool {
    let (elapsed, total) = status.progress();
    if total == 0 || elapsed == 0 {
        return false;
    }
    total.saturating_sub(elapsed) < threshold_secs
}

/// Read-modify-write the counter sticker of `uri`; returns the new value.
///
/// A missing sticker counts as zero. Not atomic against other writers.
pub async fn increment_playcount(
    client: &mut MpdClient,
    uri: &str,
    sticker: &str,
) -> Result<u64, MpdError> {
    let value = client.sticker_get(STICKER_SONG_TYPE, uri, sticker).await?;
    let data_format = |source| MpdError::DataFormat {
        uri: uri.to_string(),
        name: sticker.to_string(),
        value: value.clone(),
        source,
    };
    let current = if value.is_empty() {
        0
    } else {
        value
            .trim()
            .parse::<u64>()
            .map_err(|e| data_format(Some(e)))?
    };

    let next = current.checked_add(1).ok_or_else(|| data_format(None))?;
    client
        .sticker_set(STICKER_SONG_TYPE, uri, sticker, &next.to_string())
        .await?;
    Ok(next)
}

/// Last seen player status and current song.
#[derive(Debug, Clone, Default)]
pub struct SongStatusInfo {
    pub status: Info,
    pub song: Info,
}

/// The tracker's state machine, driven one update at a time.
pub struct SongTracker {
    info: SongStatusInfo,
    settings: PlaycountSettings,
}

impl SongTracker {
    /// Fetch the initial status and current song.
    pub async fn init(client: &mut MpdClient, settings: PlaycountSettings) -> Result<Self, MpdError> {
        let status = client.status().await?;
        let song = client.current_song().await?;
        Ok(Self {
            info: SongStatusInfo { status, song },
            settings,
        })
    }

    pub fn info(&self) -> &SongStatusInfo {
        &self.info
    }

    /// Polling only matters while playing.
    pub fn poll_suppressed(&self) -> bool {
        self.info.status.state() != PlayState::Play
    }

    /// Run one update step. Returns the new playcount if one was written.
    pub async fn update(
        &mut self,
        client: &mut MpdClient,
        bus: &SharedBus,
    ) -> Result<Option<u64>, MpdError> {
        let status = client.status().await?;
        let mut playcount = None;

        if status.song_id() != self.info.status.song_id() {
            let played = was_played(&self.info.status, self.settings.played_threshold_secs);
            let previous = &self.info.song;
            debug!(
                "Song changed: {:?} -> {:?} (played: {})",
                self.info.status.song_id(),
                status.song_id(),
                played
            );
            bus.publish(BusEvent::SongChanged {
                previous_file: previous.file().map(str::to_string),
                played,
            });

            if played {
                match previous.file() {
                    Some(file) => {
                        let count =
                            increment_playcount(client, file, &self.settings.sticker).await?;
                        info!(
                            "Playcounts: {} playcount={}",
                            previous.title().unwrap_or(file),
                            count
                        );
                        bus.publish(BusEvent::PlaycountIncremented {
                            file: file.to_string(),
                            title: previous.title().map(str::to_string),
                            playcount: count,
                        });
                        playcount = Some(count);
                    }
                    None => warn!("Played song has no file, playcount not recorded"),
                }
            }
        }
        self.info.status = status;

        // The previous song is no longer needed; cache what plays now
        self.info.song = client.current_song().await?;
        Ok(playcount)
    }
}

/// Service tying the tracker to a poll timer and `player` idle notifications.
pub struct PlaycountService {
    client: MpdClient,
    settings: PlaycountSettings,
}

impl PlaycountService {
    pub fn new(client: MpdClient, settings: PlaycountSettings) -> Self {
        Self { client, settings }
    }

    async fn track(&mut self, watcher: &IdleWatcher, ctx: &ServiceContext) -> Result<()> {
        if self.settings.poll_interval.is_zero() {
            bail!("playcount poll interval must be greater than zero");
        }
        let mut tracker = SongTracker::init(&mut self.client, self.settings.clone()).await?;
        let mut poll_suppressed = tracker.poll_suppressed();

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notification = watcher.subscribe(&[PLAYER_SUBSYSTEM]);

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    info!("Playcount tracker received shutdown signal");
                    return Ok(());
                }
                _ = poll.tick() => {
                    if !poll_suppressed {
                        tracker.update(&mut self.client, &ctx.bus).await?;
                    }
                }
                changed = &mut notification => {
                    let subsystem = changed.map_err(|_| anyhow!("idle watcher stopped"))?;
                    debug!("Idle notification: {}", subsystem);
                    notification = watcher.subscribe(&[PLAYER_SUBSYSTEM]);

                    tracker.update(&mut self.client, &ctx.bus).await?;
                    poll_suppressed = tracker.poll_suppressed();
                }
            }
        }
    }
}

#[async_trait]
impl Service for PlaycountService {
    fn name(&self) -> &'static str {
        "playcount"
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()> {
        let conn = self.client.duplicate().await?;
        let mut watcher = IdleWatcher::spawn(conn, &[PLAYER_SUBSYSTEM], ctx.bus.clone());

        let result = self.track(&watcher, &ctx).await;

        if let Err(e) = watcher.shutdown().await {
            warn!("Idle watcher shutdown: {}", e);
        }
        if let Err(e) = self.client.close().await {
            debug!("Closing primary connection: {}", e);
        }
        result
    }
}
