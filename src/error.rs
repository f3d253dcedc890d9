//! Error taxonomy for the casting core
//!
//! Every subprocess or network failure is converted into one of these at its
//! boundary; callers turn them into status text or safe no-ops.

use thiserror::Error;

/// Errors surfaced by the casting core
#[derive(Debug, Error)]
pub enum Error {
    /// Local file missing/unreadable, or remote resolution failed
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// No encoder passed the synthetic encode test
    #[error("No working video encoder found")]
    EncoderUnavailable,

    /// Transcoder could not be started or died mid-stream
    #[error("Transcoder failed: {0}")]
    TranscodeFailed(String),

    /// Receiver rejected a play/stop/volume command
    #[error("Receiver {action} failed: {reason}")]
    Receiver { action: &'static str, reason: String },

    /// Probe tool failed or produced unparseable output
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for receiver command failures
    pub fn receiver(action: &'static str, reason: impl Into<String>) -> Self {
        Error::Receiver {
            action,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
