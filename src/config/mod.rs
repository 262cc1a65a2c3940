//! Configuration management

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::services::playcount::{PLAYCOUNT_STICKER, PLAYED_THRESHOLD_SECS, POLL_INTERVAL};

const DEFAULT_MPD_HOST: &str = "localhost";
const DEFAULT_MPD_PORT: u16 = 6600;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mpd: MpdConfig,

    #[serde(default)]
    pub playcount: PlaycountConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
        }
    }
}

fn default_mpd_host() -> String {
    DEFAULT_MPD_HOST.to_string()
}

fn default_mpd_port() -> u16 {
    DEFAULT_MPD_PORT
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaycountConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_played_threshold_secs")]
    pub played_threshold_secs: u64,
    #[serde(default = "default_sticker")]
    pub sticker: String,
}

impl Default for PlaycountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            played_threshold_secs: default_played_threshold_secs(),
            sticker: default_sticker(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    POLL_INTERVAL.as_millis() as u64
}

fn default_played_threshold_secs() -> u64 {
    PLAYED_THRESHOLD_SECS
}

fn default_sticker() -> String {
    PLAYCOUNT_STICKER.to_string()
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("MPDFAV_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join("Library/Application Support/mpd-playcount");
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("mpd-playcount");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/mpd-playcount");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("mpd-playcount");
        }
    }

    // Fallback to current directory
    std::path::PathBuf::from(".")
}

/// Host part of an `MPD_HOST` value (`[password@]host`).
fn mpd_host_from_env(value: &str) -> &str {
    match value.rsplit_once('@') {
        Some((_, host)) => {
            tracing::warn!("MPD_HOST carries a password, which is not supported; ignoring it");
            host
        }
        None => value,
    }
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        // Start with defaults
        .set_default("mpd.host", DEFAULT_MPD_HOST)?
        .set_default("mpd.port", DEFAULT_MPD_PORT as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (MPDFAV_MPD__HOST, MPDFAV_PLAYCOUNT__STICKER, etc.)
        .add_source(
            ::config::Environment::with_prefix("MPDFAV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // The variables every MPD client honours win over the config file
    if let Ok(host) = std::env::var("MPD_HOST") {
        builder = builder.set_override("mpd.host", mpd_host_from_env(&host))?;
    }
    if let Ok(port) = std::env::var("MPD_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("mpd.port", port_num as i64)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.playcount.poll_interval_ms == 0 {
            bail!("playcount.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}
