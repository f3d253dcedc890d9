//! Chromecast control via catt CLI
//!
//! Controls playback using catt, which wraps the Cast protocol behind a
//! simple command line. Every call is one short-lived `catt` process.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{CastDevice, ReceiverStatus};
use crate::receiver::{MediaMetadata, Receiver};

/// catt can take a while to find the device on a busy network
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const NOT_INSTALLED: &str = "catt not found. Install with: pip install catt";

/// catt's answer to `status` when nothing is loaded
const NOTHING_PLAYING: &str = "nothing is currently playing";

/// Receiver backed by the catt CLI
#[derive(Debug, Clone)]
pub struct CattReceiver {
    /// Path to catt binary
    catt_path: String,
    /// Device name or IP; catt's own default when None
    device: Option<String>,
}

impl CattReceiver {
    pub fn new(device: Option<String>) -> Self {
        Self::with_path("catt", device)
    }

    /// Create with custom catt path
    pub fn with_path(path: impl Into<String>, device: Option<String>) -> Self {
        Self {
            catt_path: path.into(),
            device,
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Full argument list: `-d DEVICE` goes before the subcommand
    pub fn command_args(&self, args: &[&str]) -> Vec<String> {
        let mut catt_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(d) = &self.device {
            catt_args.insert(0, "-d".to_string());
            catt_args.insert(1, d.clone());
        }
        catt_args
    }

    async fn run(&self, action: &'static str, args: &[&str]) -> Result<Output> {
        let catt_args = self.command_args(args);
        debug!("catt {}", catt_args.join(" "));

        let output = Command::new(&self.catt_path)
            .args(&catt_args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(COMMAND_TIMEOUT, output).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::receiver(action, NOT_INSTALLED))
            }
            Ok(Err(e)) => Err(Error::receiver(action, e.to_string())),
            Err(_) => Err(Error::receiver(action, "timed out")),
        }
    }

    /// Run and require a zero exit status
    async fn run_checked(&self, action: &'static str, args: &[&str]) -> Result<Output> {
        let output = self.run(action, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(Error::receiver(action, failure_reason(&output)))
        }
    }

    /// Discover devices on the local network
    pub async fn scan(&self) -> Result<Vec<CastDevice>> {
        // scan ignores -d
        let output = Command::new(&self.catt_path)
            .arg("scan")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(COMMAND_TIMEOUT, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::receiver("scan", NOT_INSTALLED))
            }
            Ok(Err(e)) => return Err(Error::receiver("scan", e.to_string())),
            Err(_) => return Err(Error::receiver("scan", "timed out")),
        };

        // catt sometimes reports on stderr
        let mut devices = CastDevice::parse_catt_scan(&String::from_utf8_lossy(&output.stdout));
        if devices.is_empty() {
            devices = CastDevice::parse_catt_scan(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(devices)
    }
}

impl Default for CattReceiver {
    fn default() -> Self {
        Self::new(None)
    }
}

fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let reason = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if reason.is_empty() {
        format!("exited with {}", output.status)
    } else {
        reason.to_string()
    }
}

/// Status text from catt, where an idle device is reported as an error
pub fn status_from_output(output: &Output) -> Result<ReceiverStatus> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if stdout.to_lowercase().contains(NOTHING_PLAYING)
        || stderr.to_lowercase().contains(NOTHING_PLAYING)
    {
        return Ok(ReceiverStatus::idle());
    }
    if !output.status.success() {
        return Err(Error::receiver("status", failure_reason(output)));
    }
    ReceiverStatus::parse_catt_status(&stdout).ok_or_else(|| {
        Error::receiver(
            "status",
            format!("no player state in output: {:?}", stdout.trim()),
        )
    })
}

#[async_trait]
impl Receiver for CattReceiver {
    fn name(&self) -> String {
        self.device
            .clone()
            .unwrap_or_else(|| "default Chromecast".to_string())
    }

    async fn wait_ready(&self) -> Result<()> {
        let output = self.run("connect", &["status"]).await?;
        status_from_output(&output).map(|_| ())
    }

    /// catt derives title and content type from the URL itself; only the
    /// stream address is passed on
    async fn play_media(
        &self,
        url: &str,
        title: &str,
        content_type: &str,
        metadata: &MediaMetadata,
    ) -> Result<()> {
        info!("Casting '{}' ({}) to {}", title, content_type, self.name());
        debug!(
            "Metadata: duration={:?} thumbnail={:?}",
            metadata.duration, metadata.thumbnail_url
        );
        self.run_checked("play", &["cast", url]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.run_checked("stop", &["stop"]).await.map(|_| ())
    }

    async fn set_volume(&self, level: f32) -> Result<()> {
        let percent = ((level.clamp(0.0, 1.0) * 100.0).round() as u8).to_string();
        self.run_checked("volume", &["volume", percent.as_str()])
            .await
            .map(|_| ())
    }

    async fn status(&self) -> Result<ReceiverStatus> {
        let output = self.run("status", &["status"]).await?;
        status_from_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReceiverState;

    #[cfg(unix)]
    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_device_flag_goes_first() {
        let receiver = CattReceiver::new(Some("Living Room".to_string()));
        assert_eq!(
            receiver.command_args(&["volume", "40"]),
            vec!["-d", "Living Room", "volume", "40"]
        );
        assert_eq!(CattReceiver::default().command_args(&["stop"]), vec!["stop"]);
    }

    #[test]
    fn test_name_falls_back() {
        assert_eq!(CattReceiver::default().name(), "default Chromecast");
        assert_eq!(CattReceiver::new(Some("TV".into())).name(), "TV");
    }

    #[cfg(unix)]
    #[test]
    fn test_status_nothing_playing_is_idle() {
        let out = output(1, "", "Error: Nothing is currently playing.\n");
        assert_eq!(status_from_output(&out).unwrap(), ReceiverStatus::idle());
    }

    #[cfg(unix)]
    #[test]
    fn test_status_playing() {
        let out = output(0, "Title: stream.mp4\nCurrent time: 0:00:05 (5.2)\nState: PLAYING\n", "");
        let status = status_from_output(&out).unwrap();
        assert_eq!(status.state, ReceiverState::Playing);
        assert!((status.current_time - 5.2).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn test_status_without_state_is_error() {
        let out = output(0, "Error: could not connect\n", "");
        let err = status_from_output(&out).unwrap_err();
        assert!(matches!(err, Error::Receiver { action: "status", .. }));

        let out = output(0, "", "");
        assert!(status_from_output(&out).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_status_failure_is_receiver_error() {
        let out = output(1, "", "Error: Specified device \"Den\" not found\n");
        let err = status_from_output(&out).unwrap_err();
        assert!(matches!(err, Error::Receiver { action: "status", .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_catt_binary() {
        let receiver = CattReceiver::with_path("/nonexistent/catt", None);
        let err = receiver.stop().await.unwrap_err();
        assert!(err.to_string().contains("pip install catt"));
    }
}
