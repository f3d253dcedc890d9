//! Configuration management for ReelCast
//!
//! Handles config file loading/saving. Config is stored at
//! ~/.config/reelcast/config.toml; every field has a default so a missing
//! or partial file is fine.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineTimings;
use crate::models::{AspectRatio, Resolution};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP port of the stream server
    pub port: u16,
    /// Interface the stream server binds to
    pub bind_address: IpAddr,
    /// Address put into stream URLs (default: detected LAN IP)
    pub advertise_address: Option<IpAddr>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub catt_path: String,
    /// Default Chromecast device name
    pub default_device: Option<String>,
    pub resolution: Resolution,
    pub aspect: AspectRatio,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    /// Bytes per read from the transcoder's stdout
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    pub start_grace_secs: u64,
    pub seek_cooldown_secs: u64,
    pub seek_lock_secs: u64,
    /// Time a transcoder gets to exit after SIGTERM before it is killed
    pub kill_grace_ms: u64,
    /// Where thumbnails are rendered (default ~/.cache/reelcast)
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            advertise_address: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            catt_path: "catt".to_string(),
            default_device: None,
            resolution: Resolution::default(),
            aspect: AspectRatio::default(),
            video_bitrate: "4M".to_string(),
            audio_bitrate: "128k".to_string(),
            chunk_size: 64 * 1024,
            poll_interval_ms: 1000,
            start_grace_secs: 3,
            seek_cooldown_secs: 5,
            seek_lock_secs: 8,
            kill_grace_ms: 2000,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Get config file path (~/.config/reelcast/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reelcast").join("config.toml"))
    }

    /// Load config from the default location, or defaults if not found
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    /// Load config from a specific file, or defaults if missing/invalid
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Thumbnail location served as /thumb.jpg
    pub fn thumbnail_path(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("reelcast")))
            .unwrap_or_else(std::env::temp_dir)
            .join("thumb.jpg")
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Engine timing constants
    pub fn timings(&self) -> EngineTimings {
        EngineTimings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            start_grace: Duration::from_secs(self.start_grace_secs),
            seek_cooldown: Duration::from_secs(self.seek_cooldown_secs),
            seek_lock: Duration::from_secs(self.seek_lock_secs),
        }
    }
}
