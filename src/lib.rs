//! ReelCast - cast local files and resolved streams to a Chromecast
//!
//! Media is transcoded on the fly into fragmented MP4 and served over HTTP to
//! the receiver. Seeking restarts the transcoder at the new offset, and the
//! engine keeps the displayed timeline in sync with what the receiver reports.
//!
//! # Modules
//!
//! - `models` - Shared data structures (queue items, formats, receiver status)
//! - `transcode` - Encoder detection, filter graphs, probing, child processes
//! - `stream` - Stream parameters and the HTTP stream server
//! - `queue` - Playback queue
//! - `receiver` - Receiver trait and the catt-backed implementation
//! - `engine` - Playback synchronization engine and its command surface
//! - `cli` / `commands` - Command-line front end

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod queue;
pub mod receiver;
pub mod stream;
pub mod transcode;

// Re-export commonly used types
pub use config::Config;
pub use engine::{
    EngineOptions, EngineTimings, NullObserver, PlaybackController, PlaybackObserver, RunOutcome,
};
pub use error::{Error, Result};
pub use models::{
    AspectRatio, CastDevice, PlayableItem, ReceiverState, ReceiverStatus, RemoteMedia, Resolution,
    SubtitleOption, SubtitleSelection,
};
pub use queue::Queue;
pub use receiver::{CattReceiver, MediaMetadata, Receiver};
pub use stream::{MediaSource, SharedStreamConfig, StreamConfig, StreamServer};
pub use transcode::{EncoderChoice, EncoderFamily};
