//! Shared transcoding parameters
//!
//! The engine is the only writer; every stream request takes one snapshot
//! under the same lock, so a request that arrives after a play command sees
//! everything the engine set before sending it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::models::{AspectRatio, Resolution, SubtitleSelection};
use crate::transcode::EncoderChoice;

/// What the transcoder reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Local(PathBuf),
    Remote {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl MediaSource {
    /// Input argument for the transcoder
    pub fn input(&self) -> String {
        match self {
            MediaSource::Local(path) => path.to_string_lossy().into_owned(),
            MediaSource::Remote { url, .. } => url.clone(),
        }
    }

    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            MediaSource::Local(_) => None,
            MediaSource::Remote { headers, .. } => Some(headers),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Local(path) => write!(f, "{}", path.display()),
            MediaSource::Remote { url, .. } => write!(f, "{}", url),
        }
    }
}

/// Parameters of the next transcode
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub source: Option<MediaSource>,
    /// Whole seconds the transcoder pre-seeks into the source
    pub seek_offset: u64,
    pub subtitle: SubtitleSelection,
    pub resolution: Resolution,
    pub aspect: AspectRatio,
    pub encoder: EncoderChoice,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StreamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: None,
            seek_offset: 0,
            subtitle: SubtitleSelection::None,
            resolution: config.resolution,
            aspect: config.aspect,
            encoder: EncoderChoice::software(),
            video_bitrate: config.video_bitrate.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }
}

/// Cloneable handle to the one [`StreamConfig`] of the process
#[derive(Debug, Clone, Default)]
pub struct SharedStreamConfig {
    inner: Arc<RwLock<StreamConfig>>,
}

impl SharedStreamConfig {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Consistent copy of the current parameters
    pub fn snapshot(&self) -> StreamConfig {
        self.inner.read().clone()
    }

    /// Apply several changes atomically
    pub fn update<R>(&self, f: impl FnOnce(&mut StreamConfig) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn seek_offset(&self) -> u64 {
        self.inner.read().seek_offset
    }

    pub fn set_seek_offset(&self, offset: u64) {
        self.inner.write().seek_offset = offset;
    }

    pub fn set_subtitle(&self, subtitle: SubtitleSelection) {
        self.inner.write().subtitle = subtitle;
    }

    pub fn set_encoder(&self, encoder: EncoderChoice) {
        self.inner.write().encoder = encoder;
    }

    /// Point at a new item: offset back to zero, subtitles as given
    pub fn begin_item(&self, source: MediaSource, subtitle: SubtitleSelection) {
        self.update(|c| {
            c.source = Some(source);
            c.seek_offset = 0;
            c.subtitle = subtitle;
        });
    }
}
