//! Cast receivers
//!
//! The engine talks to the device through [`Receiver`] and polls it for a
//! [`ReceiverStatus`] snapshot; it never relies on push notifications.

pub mod catt;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ReceiverStatus;

pub use catt::CattReceiver;

/// Optional extras sent along with a play command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub thumbnail_url: Option<String>,
    /// Declared duration in seconds
    pub duration: Option<f64>,
}

/// A device that fetches and renders the HTTP stream
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Human-readable device name for status text
    fn name(&self) -> String;

    /// Block until the device accepts commands
    async fn wait_ready(&self) -> Result<()>;

    async fn play_media(
        &self,
        url: &str,
        title: &str,
        content_type: &str,
        metadata: &MediaMetadata,
    ) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Volume in `0.0..=1.0`
    async fn set_volume(&self, level: f32) -> Result<()>;

    async fn status(&self) -> Result<ReceiverStatus>;
}
