//! Media inspection via ffprobe, plus thumbnail rendering
//!
//! Everything here is best effort: callers run these on one-shot background
//! tasks and only log failures.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{display_name, SubFormat, SubtitleOption, SubtitleSelection};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Seconds into the file the thumbnail frame is taken from
const THUMBNAIL_AT: &str = "5";

#[derive(Debug, Deserialize)]
struct ProbeStreams {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    language: Option<String>,
    title: Option<String>,
}

/// Run a probe command and return its stdout
async fn run_probe(mut cmd: Command) -> Result<String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| Error::Probe("timed out".to_string()))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Probe(format!(
            "exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Media duration in seconds
pub async fn probe_duration(ffprobe: &str, source: &str) -> Result<f64> {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(source);

    let stdout = run_probe(cmd).await?;
    parse_duration(&stdout)
}

/// Parse ffprobe's bare `format=duration` output
pub fn parse_duration(stdout: &str) -> Result<f64> {
    let value = stdout.trim();
    value
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| Error::Probe(format!("unparseable duration '{}'", value)))
}

/// Subtitle streams inside a container, numbered among subtitle streams
pub async fn probe_subtitle_tracks(ffprobe: &str, path: &Path) -> Result<Vec<SubtitleOption>> {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "s",
        "-show_entries",
        "stream=index:stream_tags=language,title",
        "-of",
        "json",
    ])
    .arg(path);

    let stdout = run_probe(cmd).await?;
    parse_subtitle_tracks(&stdout)
}

/// Parse ffprobe JSON for subtitle streams
///
/// The burn-in filter addresses tracks by their position among subtitle
/// streams, so that ordinal is what goes into the selection.
pub fn parse_subtitle_tracks(json: &str) -> Result<Vec<SubtitleOption>> {
    let parsed: ProbeStreams =
        serde_json::from_str(json).map_err(|e| Error::Probe(format!("invalid JSON: {}", e)))?;

    Ok(parsed
        .streams
        .into_iter()
        .enumerate()
        .map(|(ordinal, stream)| {
            let ordinal = ordinal as u32;
            let label = match (stream.tags.language, stream.tags.title) {
                (Some(lang), Some(title)) => format!("Track {} [{}] {}", ordinal, lang, title),
                (Some(lang), None) => format!("Track {} [{}]", ordinal, lang),
                (None, Some(title)) => format!("Track {} {}", ordinal, title),
                (None, None) => format!("Track {}", ordinal),
            };
            SubtitleOption {
                label,
                selection: SubtitleSelection::InternalStream(ordinal),
            }
        })
        .collect())
}

/// Subtitle files next to the media sharing its stem (movie.srt, movie.en.srt)
pub fn find_sidecar_subtitles(media: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(stem)) = (media.parent(), media.file_stem()) else {
        return Vec::new();
    };
    let stem = stem.to_string_lossy().to_lowercase();
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| SubFormat::from_extension(&ext.to_string_lossy()))
                .is_some()
        })
        .filter(|path| {
            path.file_stem()
                .map(|s| {
                    let s = s.to_string_lossy().to_lowercase();
                    s == stem || s.starts_with(&format!("{}.", stem))
                })
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found
}

/// All subtitle choices for a local file: sidecar files, then embedded tracks
pub async fn discover_subtitle_options(ffprobe: &str, media: &Path) -> Vec<SubtitleOption> {
    let mut options: Vec<SubtitleOption> = find_sidecar_subtitles(media)
        .into_iter()
        .map(|path| SubtitleOption {
            label: display_name(&path),
            selection: SubtitleSelection::ExternalFile(path),
        })
        .collect();

    match probe_subtitle_tracks(ffprobe, media).await {
        Ok(tracks) => options.extend(tracks),
        Err(e) => debug!("Subtitle track probe failed for {}: {}", media.display(), e),
    }
    options
}

/// Render one JPEG frame of `media` into `output`
///
/// Takes the frame a few seconds in; very short clips fall back to the
/// first frame.
pub async fn render_thumbnail(ffmpeg: &str, media: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let _ = tokio::fs::remove_file(output).await;

    for seek in [THUMBNAIL_AT, "0"] {
        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-ss", seek, "-i"])
            .arg(media)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output);
        run_probe(cmd).await?;

        if tokio::fs::metadata(output).await.is_ok() {
            return Ok(());
        }
    }
    Err(Error::Probe(format!(
        "no frame rendered from {}",
        media.display()
    )))
}
