//! Data structures and types for ReelCast
//!
//! Contains the shared models used across the casting core, organized by domain:
//! - **Queue**: playable items (local files, resolver-supplied remote media)
//! - **Transcode**: output resolution, aspect ratio, subtitle selection
//! - **Cast**: Chromecast devices and polled receiver status

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// Queue Models
// =============================================================================

/// One entry of the playback queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayableItem {
    /// A file on this machine, transcoded from disk
    LocalFile { path: PathBuf },
    /// A direct media address produced by the external resolver
    RemoteMedia(RemoteMedia),
}

/// Resolved remote media descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMedia {
    /// Direct, playable media address
    pub url: String,
    /// Display title
    pub title: String,
    /// Declared duration in seconds, when the resolver knows it
    pub duration: Option<f64>,
    /// HTTP headers required to fetch `url`
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Subtitle burn-in requested by the resolver metadata
    #[serde(default)]
    pub subtitle: SubtitleSelection,
}

impl RemoteMedia {
    /// Remote descriptor with no headers, duration or subtitles
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            duration: None,
            headers: BTreeMap::new(),
            subtitle: SubtitleSelection::None,
        }
    }
}

impl PlayableItem {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        PlayableItem::LocalFile { path: path.into() }
    }

    /// Title shown to the user and sent to the receiver
    pub fn title(&self) -> String {
        match self {
            PlayableItem::LocalFile { path } => display_name(path),
            PlayableItem::RemoteMedia(remote) => remote.title.clone(),
        }
    }

    /// Duration known up front (remote items only; local files are probed)
    pub fn declared_duration(&self) -> Option<f64> {
        match self {
            PlayableItem::LocalFile { .. } => None,
            PlayableItem::RemoteMedia(remote) => remote.duration,
        }
    }
}

impl fmt::Display for PlayableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayableItem::LocalFile { path } => write!(f, "{}", path.display()),
            PlayableItem::RemoteMedia(remote) => write!(f, "{} <{}>", remote.title, remote.url),
        }
    }
}

/// File name of a path, falling back to the full path
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Transcode Models
// =============================================================================

/// Which subtitles get burned into the video
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SubtitleSelection {
    #[default]
    None,
    /// A sidecar subtitle file
    ExternalFile(PathBuf),
    /// N-th subtitle stream inside the media container
    InternalStream(u32),
}

impl SubtitleSelection {
    pub fn is_none(&self) -> bool {
        matches!(self, SubtitleSelection::None)
    }
}

impl fmt::Display for SubtitleSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtitleSelection::None => write!(f, "No subtitles"),
            SubtitleSelection::ExternalFile(path) => write!(f, "{}", display_name(path)),
            SubtitleSelection::InternalStream(index) => write!(f, "Track #{}", index),
        }
    }
}

/// A user-selectable subtitle choice discovered for the current item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleOption {
    pub label: String,
    pub selection: SubtitleSelection,
}

/// Subtitle file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubFormat {
    Srt,
    WebVtt,
    Ass,
}

impl SubFormat {
    /// Parse format from file extension, `None` if not a subtitle file
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "srt" => Some(SubFormat::Srt),
            "vtt" | "webvtt" => Some(SubFormat::WebVtt),
            "ass" | "ssa" => Some(SubFormat::Ass),
            _ => None,
        }
    }
}

impl fmt::Display for SubFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubFormat::Srt => write!(f, "SRT"),
            SubFormat::WebVtt => write!(f, "WebVTT"),
            SubFormat::Ass => write!(f, "ASS"),
        }
    }
}

/// Output frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const SD480: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame size matching an aspect ratio (4:3 → 640x480, otherwise 720p)
    pub fn for_aspect(aspect: AspectRatio) -> Self {
        if aspect == AspectRatio::STANDARD {
            Resolution::SD480
        } else {
            Resolution::HD720
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::HD720
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts `1280x720` or `1280:720`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X', ':'])
            .ok_or_else(|| format!("Invalid resolution '{}' (expected WIDTHxHEIGHT)", s))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("Invalid width in '{}'", s))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("Invalid height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("Resolution must be non-zero: '{}'", s));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> String {
        r.to_string()
    }
}

/// Display aspect ratio as a rational
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio {
    pub num: u32,
    pub den: u32,
}

impl AspectRatio {
    pub const WIDESCREEN: AspectRatio = AspectRatio { num: 16, den: 9 };
    pub const STANDARD: AspectRatio = AspectRatio { num: 4, den: 3 };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::WIDESCREEN
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    /// Accepts `16/9` or `16:9`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, d) = s
            .trim()
            .split_once(['/', ':'])
            .ok_or_else(|| format!("Invalid aspect ratio '{}' (expected N/D)", s))?;
        let num: u32 = n.trim().parse().map_err(|_| format!("Invalid aspect ratio '{}'", s))?;
        let den: u32 = d.trim().parse().map_err(|_| format!("Invalid aspect ratio '{}'", s))?;
        if num == 0 || den == 0 {
            return Err(format!("Aspect ratio must be non-zero: '{}'", s));
        }
        Ok(Self { num, den })
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(a: AspectRatio) -> String {
        a.to_string()
    }
}

// =============================================================================
// Cast Models (Chromecast)
// =============================================================================

/// Chromecast device discovered on the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastDevice {
    pub id: String,
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

impl CastDevice {
    /// Parse devices from catt scan output
    /// Format: "192.168.1.36 - Device Name - Google Inc. Chromecast"
    pub fn parse_catt_scan(output: &str) -> Vec<CastDevice> {
        let mut devices = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Scanning") || line.contains("No devices") {
                continue;
            }

            let parts: Vec<&str> = line.splitn(3, " - ").collect();
            if parts.len() >= 2 {
                let ip_str = parts[0].trim();
                if let Ok(addr) = ip_str.parse::<IpAddr>() {
                    devices.push(CastDevice {
                        id: ip_str.to_string(),
                        name: parts[1].trim().to_string(),
                        address: addr,
                        port: 8009,
                        model: parts.get(2).map(|m| m.trim().to_string()),
                    });
                }
            }
        }

        devices
    }
}

impl fmt::Display for CastDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{} ({}) - {}", self.name, model, self.address),
            None => write!(f, "{} - {}", self.name, self.address),
        }
    }
}

/// Receiver-reported player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiverState {
    Playing,
    Buffering,
    Paused,
    #[default]
    Idle,
}

impl ReceiverState {
    /// Parse state from catt status output (`None` for UNKNOWN or garbage)
    pub fn from_catt_state(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PLAYING" => Some(ReceiverState::Playing),
            "PAUSED" => Some(ReceiverState::Paused),
            "BUFFERING" => Some(ReceiverState::Buffering),
            "IDLE" => Some(ReceiverState::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverState::Playing => write!(f, "PLAYING"),
            ReceiverState::Buffering => write!(f, "BUFFERING"),
            ReceiverState::Paused => write!(f, "PAUSED"),
            ReceiverState::Idle => write!(f, "IDLE"),
        }
    }
}

/// Snapshot of the receiver's playback status
///
/// `current_time` counts from the start of the receiver's current connection,
/// not from the start of the media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverStatus {
    pub state: ReceiverState,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub volume: Option<f32>,
    pub title: Option<String>,
}

impl ReceiverStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn playing(current_time: f64) -> Self {
        Self {
            state: ReceiverState::Playing,
            current_time,
            ..Self::default()
        }
    }

    /// Parse status from catt status output
    /// Format:
    /// ```text
    /// Title: stream.mp4
    /// Current time: 0:20:34 (1234.5)
    /// State: PLAYING
    /// Volume: 80
    /// ```
    ///
    /// Returns `None` without a recognizable `State:` line.
    pub fn parse_catt_status(output: &str) -> Option<Self> {
        let mut status = Self::default();
        let mut state = None;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "state" => state = ReceiverState::from_catt_state(value),
                "current time" => {
                    if let Some(secs) = parse_catt_seconds(value) {
                        status.current_time = secs;
                    }
                }
                "duration" => status.duration = parse_catt_seconds(value),
                "volume" => {
                    if let Ok(vol) = value.parse::<f32>() {
                        status.volume = Some(vol / 100.0);
                    }
                }
                "title" => status.title = Some(value.to_string()),
                _ => {}
            }
        }

        status.state = state?;
        Some(status)
    }
}

/// catt prints either `1234.5` or `0:20:34 (1234.5)`
fn parse_catt_seconds(value: &str) -> Option<f64> {
    if let (Some(open), Some(close)) = (value.rfind('('), value.rfind(')')) {
        if open < close {
            return value[open + 1..close].trim().parse().ok();
        }
    }
    value.parse().ok()
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Format seconds as HH:MM:SS (negative and non-finite values clamp to zero)
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
