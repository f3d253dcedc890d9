//! Hardware encoder detection
//!
//! Runs a one-frame synthetic encode with every candidate encoder for this
//! platform and keeps the first one that works. `libx264` is always the
//! last candidate, so detection never comes back empty-handed.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long one synthetic encode may take before it counts as a failure
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Render node used for VA-API
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Encoder family, decides filter-graph shape and encoder options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    Software,
    Vaapi,
    Nvenc,
    Qsv,
    VideoToolbox,
    Amf,
}

impl EncoderFamily {
    /// Families that want frames uploaded to a device surface before scaling
    pub fn needs_hw_upload(&self) -> bool {
        matches!(self, EncoderFamily::Vaapi | EncoderFamily::Qsv)
    }

    /// Encoder options that give the lowest start-up latency
    pub fn preset_args(&self) -> Vec<&'static str> {
        match self {
            EncoderFamily::Software => vec!["-preset", "ultrafast", "-tune", "zerolatency"],
            EncoderFamily::Nvenc => vec!["-preset", "p1", "-tune", "ll"],
            EncoderFamily::Qsv => vec!["-preset", "veryfast"],
            EncoderFamily::VideoToolbox => vec!["-realtime", "1"],
            EncoderFamily::Amf => vec!["-quality", "speed"],
            EncoderFamily::Vaapi => vec![],
        }
    }
}

/// A usable video encoder plus the input-side options it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderChoice {
    pub name: String,
    pub family: EncoderFamily,
    /// Options placed before `-i` (device selection)
    pub extra_input_args: Vec<String>,
}

impl EncoderChoice {
    /// Universal software encoder
    pub fn software() -> Self {
        Self {
            name: "libx264".to_string(),
            family: EncoderFamily::Software,
            extra_input_args: Vec::new(),
        }
    }

    fn new(name: &str, family: EncoderFamily, extra_input_args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            family,
            extra_input_args: extra_input_args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Arguments for a one-frame encode of a generated test pattern
    pub fn probe_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.extra_input_args.iter().cloned());
        args.extend(
            ["-f", "lavfi", "-i", "color=c=black:s=640x480", "-frames:v", "1"]
                .iter()
                .map(|s| s.to_string()),
        );
        match self.family {
            EncoderFamily::Vaapi => {
                args.push("-vf".to_string());
                args.push("format=nv12,hwupload".to_string());
            }
            EncoderFamily::Qsv => {
                args.push("-vf".to_string());
                args.push("format=nv12,hwupload=extra_hw_frames=64".to_string());
            }
            _ => {}
        }
        args.extend([
            "-c:v".to_string(),
            self.name.clone(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

impl Default for EncoderChoice {
    fn default() -> Self {
        Self::software()
    }
}

/// Candidates in preference order for the host platform, software last
pub fn platform_candidates() -> Vec<EncoderChoice> {
    let mut candidates = Vec::new();

    #[cfg(target_os = "linux")]
    {
        candidates.push(EncoderChoice::new(
            "h264_vaapi",
            EncoderFamily::Vaapi,
            &["-vaapi_device", VAAPI_DEVICE],
        ));
        candidates.push(EncoderChoice::new("h264_nvenc", EncoderFamily::Nvenc, &[]));
        candidates.push(EncoderChoice::new(
            "h264_qsv",
            EncoderFamily::Qsv,
            &["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"],
        ));
    }

    #[cfg(target_os = "windows")]
    {
        candidates.push(EncoderChoice::new("h264_nvenc", EncoderFamily::Nvenc, &[]));
        candidates.push(EncoderChoice::new(
            "h264_qsv",
            EncoderFamily::Qsv,
            &["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"],
        ));
        candidates.push(EncoderChoice::new("h264_amf", EncoderFamily::Amf, &[]));
    }

    #[cfg(target_os = "macos")]
    {
        candidates.push(EncoderChoice::new(
            "h264_videotoolbox",
            EncoderFamily::VideoToolbox,
            &[],
        ));
    }

    candidates.push(EncoderChoice::software());
    candidates
}

/// Pick the first candidate whose synthetic encode succeeds
///
/// Falls back to the software encoder if nothing works (e.g. ffmpeg missing),
/// so playback can still be attempted.
pub async fn detect_encoder(ffmpeg: &str) -> EncoderChoice {
    match first_working(ffmpeg, platform_candidates()).await {
        Ok(choice) => {
            info!("Using video encoder {}", choice.name);
            choice
        }
        Err(e) => {
            warn!("{}, falling back to libx264", e);
            EncoderChoice::software()
        }
    }
}

/// First candidate that encodes successfully, in order
pub async fn first_working(ffmpeg: &str, candidates: Vec<EncoderChoice>) -> Result<EncoderChoice> {
    for candidate in candidates {
        if test_encoder(ffmpeg, &candidate).await {
            return Ok(candidate);
        }
    }
    Err(Error::EncoderUnavailable)
}

/// Run one synthetic encode, true if it exits successfully
pub async fn test_encoder(ffmpeg: &str, candidate: &EncoderChoice) -> bool {
    let child = Command::new(ffmpeg)
        .args(candidate.probe_args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, child).await {
        Ok(Ok(status)) => {
            debug!("Encoder test {}: {}", candidate.name, status);
            status.success()
        }
        Ok(Err(e)) => {
            debug!("Encoder test {} could not run: {}", candidate.name, e);
            false
        }
        Err(_) => {
            debug!("Encoder test {} timed out", candidate.name);
            false
        }
    }
}
