//! CLI - Command Line Interface for ReelCast
//!
//! Every subcommand is scriptable and its output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # Cast two local files back to back
//! reelcast play movie.mkv extras.mp4 --device "Living Room TV"
//!
//! # Cast a resolved remote stream with a required header
//! reelcast play --url https://cdn.example/v.m3u8 --title "Clip" --header "Referer: https://example"
//!
//! # Just serve a file at an offset
//! reelcast serve movie.mkv --seek 600
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::{AspectRatio, RemoteMedia, Resolution, SubtitleSelection};

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Device not found
    DeviceNotFound = 4,
    /// Local file missing or remote source unreachable
    SourceUnavailable = 5,
    /// Cast failed
    CastFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// ReelCast - cast local files and resolved streams to a Chromecast
#[derive(Parser, Debug)]
#[command(
    name = "reelcast",
    version,
    about = "Cast local files and resolved streams to a Chromecast",
    long_about = "Transcodes media on the fly into fragmented MP4 and serves it \
                  to a Chromecast over HTTP. Seeking restarts the transcoder at \
                  the requested offset.",
    after_help = "EXAMPLES:\n\
                  reelcast play movie.mkv -d TV          Cast a local file\n\
                  reelcast play --url URL --title T      Cast a remote stream\n\
                  reelcast serve movie.mkv --seek 600    Serve only\n\
                  reelcast encoder --json                Show the chosen encoder"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Target Chromecast device name
    #[arg(long, short = 'd', global = true)]
    pub device: Option<String>,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }

    /// Default log filter for the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "reelcast=info",
            1 => "reelcast=debug",
            _ => "reelcast=trace",
        }
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue media and cast it, reading control lines from stdin
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Run only the stream server for one file
    Serve(ServeCmd),

    /// Detect the video encoder that will be used
    #[command(visible_alias = "enc")]
    Encoder(EncoderCmd),

    /// Show duration and subtitle options of a file
    Probe(ProbeCmd),

    /// List available Chromecast devices
    #[command(visible_alias = "dev")]
    Devices(DevicesCmd),
}

// =============================================================================
// Play Command
// =============================================================================

/// Queue local files and/or remote URLs and cast them in order
#[derive(Args, Debug)]
pub struct PlayCmd {
    /// Local media files, played in the given order
    pub files: Vec<PathBuf>,

    /// Direct remote media URL (repeatable, queued after the files)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Title for the remote URL at the same position
    #[arg(long = "title")]
    pub titles: Vec<String>,

    /// Declared duration in seconds for the remote URL at the same position
    #[arg(long = "duration")]
    pub durations: Vec<f64>,

    /// HTTP header sent when fetching remote URLs ("Name: value")
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Subtitle file burned into the first item
    #[arg(long, short = 's')]
    pub subtitle: Option<PathBuf>,

    /// Output aspect ratio (16/9 or 4/3)
    #[arg(long, short = 'a')]
    pub aspect: Option<AspectRatio>,

    /// Output resolution (WIDTHxHEIGHT)
    #[arg(long, short = 'r')]
    pub resolution: Option<Resolution>,
}

impl PlayCmd {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.urls.is_empty()
    }

    /// Remote descriptors, pairing titles and durations by position
    pub fn remote_items(&self) -> Vec<RemoteMedia> {
        let headers: BTreeMap<String, String> = self.headers.iter().cloned().collect();
        self.urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let title = self
                    .titles
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| title_from_url(url));
                let mut media = RemoteMedia::new(url.clone(), title);
                media.duration = self.durations.get(i).copied().filter(|d| *d > 0.0);
                media.headers = headers.clone();
                media
            })
            .collect()
    }

    /// Resolution to apply, if the flags ask for one
    ///
    /// A 4:3 aspect without an explicit resolution implies 640x480.
    pub fn effective_resolution(&self) -> Option<Resolution> {
        self.resolution
            .or_else(|| self.aspect.map(Resolution::for_aspect))
    }
}

/// Last path segment of a URL, without query
fn title_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(url)
        .to_string()
}

/// Parse a "Name: value" header argument
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid header '{}' (expected 'Name: value')", s))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("Invalid header name in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

// =============================================================================
// Serve / Encoder / Probe / Devices Commands
// =============================================================================

/// Serve one local file as /stream.mp4 until interrupted
#[derive(Args, Debug)]
pub struct ServeCmd {
    #[arg(required = true)]
    pub file: PathBuf,

    /// Start offset in seconds or HH:MM:SS
    #[arg(long, default_value = "0", value_parser = parse_offset)]
    pub seek: u64,

    /// Subtitle file to burn in
    #[arg(long, short = 's')]
    pub subtitle: Option<PathBuf>,

    /// Port override (0 picks a free port)
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

fn parse_offset(s: &str) -> Result<u64, String> {
    s.trim()
        .parse::<u64>()
        .ok()
        .or_else(|| parse_timestamp(s.trim()))
        .ok_or_else(|| format!("Invalid offset '{}'", s))
}

/// Run encoder detection
#[derive(Args, Debug)]
pub struct EncoderCmd {}

/// Inspect a local media file
#[derive(Args, Debug)]
pub struct ProbeCmd {
    #[arg(required = true)]
    pub file: PathBuf,
}

/// List available Chromecast devices on the network
#[derive(Args, Debug)]
pub struct DevicesCmd {}

// =============================================================================
// Interactive Control Lines
// =============================================================================

/// One line typed on stdin while `play` runs
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Seek(SeekPosition),
    Skip,
    Stop,
    Volume(VolumeLevel),
    Subtitle(SubtitleChoice),
    Aspect(AspectRatio),
    Resolution(Resolution),
    /// Print the queue
    Queue,
    /// Empty the queue
    Clear,
    Help,
}

/// Subtitle argument of the `sub` control
#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleChoice {
    /// Index into the discovered subtitle options
    Option(usize),
    Selection(SubtitleSelection),
}

pub const CONTROL_HELP: &str = "commands: seek <secs|HH:MM:SS|+N|-N>, skip, stop, vol <0-100|+N|-N>, \
     sub <none|N|path>, aspect <16/9|4/3>, res <WxH>, queue, clear";

impl Control {
    pub fn parse(line: &str) -> Result<Control, String> {
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "seek" => match parse_seek(required(arg, "seek")?) {
                SeekPosition::Invalid(s) => Err(format!("Invalid seek position: {}", s)),
                position => Ok(Control::Seek(position)),
            },
            "skip" | "next" => Ok(Control::Skip),
            "stop" | "quit" => Ok(Control::Stop),
            "vol" | "volume" => match parse_volume(required(arg, "vol")?) {
                VolumeLevel::Invalid(s) => Err(format!("Invalid volume: {}", s)),
                level => Ok(Control::Volume(level)),
            },
            "sub" | "subs" => {
                let arg = required(arg, "sub")?;
                if arg.eq_ignore_ascii_case("none") || arg.eq_ignore_ascii_case("off") {
                    Ok(Control::Subtitle(SubtitleChoice::Selection(SubtitleSelection::None)))
                } else if let Ok(index) = arg.parse::<usize>() {
                    Ok(Control::Subtitle(SubtitleChoice::Option(index)))
                } else {
                    Ok(Control::Subtitle(SubtitleChoice::Selection(
                        SubtitleSelection::ExternalFile(PathBuf::from(arg)),
                    )))
                }
            }
            "aspect" => required(arg, "aspect")?.parse().map(Control::Aspect),
            "res" | "resolution" => required(arg, "res")?.parse().map(Control::Resolution),
            "queue" | "q" => Ok(Control::Queue),
            "clear" => Ok(Control::Clear),
            "help" | "?" => Ok(Control::Help),
            "" => Err("empty command".to_string()),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }
}

fn required<'a>(arg: &'a str, name: &str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("'{}' needs an argument", name))
    } else {
        Ok(arg)
    }
}

// =============================================================================
// Seek / Volume Parsing
// =============================================================================

/// Parse a seek argument: seconds, HH:MM:SS, MM:SS or a +/- delta
pub fn parse_seek(s: &str) -> SeekPosition {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix('+') {
        if let Ok(secs) = stripped.parse::<i64>() {
            return SeekPosition::Forward(secs);
        }
    } else if let Some(stripped) = s.strip_prefix('-') {
        if let Ok(secs) = stripped.parse::<i64>() {
            return SeekPosition::Backward(secs);
        }
    } else if let Ok(secs) = s.parse::<u64>() {
        return SeekPosition::Absolute(secs);
    }
    if let Some(secs) = parse_timestamp(s) {
        return SeekPosition::Absolute(secs);
    }
    SeekPosition::Invalid(s.to_string())
}

/// Parsed seek position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekPosition {
    /// Absolute position in seconds
    Absolute(u64),
    /// Seek forward by seconds
    Forward(i64),
    /// Seek backward by seconds
    Backward(i64),
    /// Invalid position string
    Invalid(String),
}

impl SeekPosition {
    /// Target on the media timeline given the current position
    pub fn resolve(&self, current: f64) -> Option<f64> {
        match self {
            SeekPosition::Absolute(secs) => Some(*secs as f64),
            SeekPosition::Forward(secs) => Some(current + *secs as f64),
            SeekPosition::Backward(secs) => Some((current - *secs as f64).max(0.0)),
            SeekPosition::Invalid(_) => None,
        }
    }
}

/// Parse timestamp string (HH:MM:SS or MM:SS) to seconds
///
/// Returns `None` for malformed input or a value that does not fit in u64.
pub fn parse_timestamp(s: &str) -> Option<u64> {
    let parts: Vec<&str> = s.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    parts.iter().try_fold(0u64, |total, part| {
        let value: u64 = part.parse().ok()?;
        total.checked_mul(60)?.checked_add(value)
    })
}

/// Parse a volume argument: 0-100 or a +/- delta
pub fn parse_volume(s: &str) -> VolumeLevel {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix('+') {
        if let Ok(delta) = stripped.parse::<i8>() {
            return VolumeLevel::Relative(delta);
        }
    } else if let Some(stripped) = s.strip_prefix('-') {
        if let Ok(delta) = stripped.parse::<i8>() {
            return VolumeLevel::Relative(-delta);
        }
    } else if let Ok(vol) = s.parse::<u8>() {
        return VolumeLevel::Absolute(vol.min(100));
    }
    VolumeLevel::Invalid(s.to_string())
}

/// Parsed volume level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeLevel {
    /// Absolute volume (0-100)
    Absolute(u8),
    /// Relative volume change
    Relative(i8),
    /// Invalid level string
    Invalid(String),
}

impl VolumeLevel {
    /// New level in percent given the current one
    pub fn resolve(&self, current: u8) -> Option<u8> {
        match self {
            VolumeLevel::Absolute(v) => Some(*v),
            VolumeLevel::Relative(delta) => {
                Some((current as i16 + *delta as i16).clamp(0, 100) as u8)
            }
            VolumeLevel::Invalid(_) => None,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Engine event printed while `play` runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Status { text: String },
    Elapsed { seconds: f64 },
    Duration { seconds: f64 },
    Queue { titles: Vec<String> },
    Subtitles { options: Vec<String> },
}

/// Stream addresses reported by `serve`
#[derive(Debug, Serialize, Deserialize)]
pub struct ServeInfo {
    pub stream_url: String,
    pub thumb_url: String,
    pub seek: u64,
}

/// Media facts reported by `probe`
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeReport {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub subtitles: Vec<String>,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            // For non-JSON, caller should handle formatting
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print one event per line (JSON lines in JSON mode)
    pub fn event(&self, event: &PlaybackEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
            return;
        }
        if self.quiet {
            return;
        }
        match event {
            PlaybackEvent::Status { text } => eprintln!("{}", text),
            PlaybackEvent::Elapsed { .. } => {}
            PlaybackEvent::Duration { seconds } => {
                eprintln!("Duration: {}", crate::models::format_timestamp(*seconds))
            }
            PlaybackEvent::Queue { titles } => {
                if titles.is_empty() {
                    eprintln!("Queue: (empty)");
                } else {
                    eprintln!("Queue: {}", titles.join(", "));
                }
            }
            PlaybackEvent::Subtitles { options } => {
                for (i, label) in options.iter().enumerate() {
                    eprintln!("  sub {}: {}", i, label);
                }
            }
        }
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
