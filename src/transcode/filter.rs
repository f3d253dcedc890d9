//! Video filter-graph construction
//!
//! Builds the `-vf` expression for one transcode: optional subtitle burn-in,
//! a single scale stage to the requested frame size with square pixels and
//! a forced display aspect, and the pixel-format/upload stages the encoder
//! family needs.

use std::fmt;
use std::path::Path;

use crate::models::{AspectRatio, Resolution};
use crate::transcode::encoder::EncoderFamily;

/// libass style for burned-in subtitles: bottom-centred, boxed, bold
const SUBTITLE_STYLE: &str = "Alignment=2,Outline=1,Shadow=1,BorderStyle=4,\
BackColour=&H80000000,Spacing=0.2,MarginV=15,FontSize=20,Bold=1";

/// Subtitle source for the burn-in stage
#[derive(Debug, Clone, Copy)]
pub struct BurnIn<'a> {
    /// Subtitle file, or the media file itself for in-container tracks
    pub path: &'a Path,
    /// Subtitle stream index inside `path` (None for plain subtitle files)
    pub stream_index: Option<u32>,
}

/// Inputs of one filter graph
#[derive(Debug, Clone, Copy)]
pub struct FilterSpec<'a> {
    pub resolution: Resolution,
    pub aspect: AspectRatio,
    pub subtitles: Option<BurnIn<'a>>,
    /// Seconds the transcoder pre-seeks into the input
    pub seek_offset: u64,
    pub family: EncoderFamily,
}

/// Ordered list of filter stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    stages: Vec<String>,
}

impl FilterGraph {
    pub fn stages(&self) -> &[String] {
        &self.stages
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stages.join(","))
    }
}

/// Build the video filter graph for a transcode
///
/// Upload families (VA-API, QSV) convert to nv12 first, burn subtitles in
/// system memory, upload, then use their own scaler. Everything else scales
/// in software and ends with a yuv420p conversion.
pub fn build_filter_graph(spec: &FilterSpec<'_>) -> FilterGraph {
    let FilterSpec {
        resolution,
        aspect,
        subtitles,
        seek_offset,
        family,
    } = *spec;
    let burn_in = subtitles
        .map(|s| subtitle_stages(s, seek_offset))
        .unwrap_or_default();
    let mut stages = Vec::with_capacity(burn_in.len() + 6);

    match family {
        EncoderFamily::Vaapi => {
            stages.push("format=nv12".to_string());
            stages.extend(burn_in);
            stages.push("hwupload".to_string());
            stages.push(format!(
                "scale_vaapi=w={}:h={}",
                resolution.width, resolution.height
            ));
        }
        EncoderFamily::Qsv => {
            stages.push("format=nv12".to_string());
            stages.extend(burn_in);
            stages.push("hwupload=extra_hw_frames=64".to_string());
            stages.push(format!(
                "scale_qsv=w={}:h={}",
                resolution.width, resolution.height
            ));
        }
        EncoderFamily::Software
        | EncoderFamily::Nvenc
        | EncoderFamily::VideoToolbox
        | EncoderFamily::Amf => {
            stages.extend(burn_in);
            stages.push(format!("scale={}:{}", resolution.width, resolution.height));
        }
    }

    stages.push("setsar=1".to_string());
    stages.push(format!("setdar={}", aspect));

    if !family.needs_hw_upload() {
        stages.push("format=yuv420p".to_string());
    }

    FilterGraph { stages }
}

/// Burn-in stage wrapped in a time shift
///
/// The input is pre-seeked, so frames arrive with timestamps starting near
/// zero. Shifting them forward by the offset lines them up with the cue
/// times in the subtitle source; shifting back afterwards restores the
/// stream-relative timeline.
fn subtitle_stages(burn_in: BurnIn<'_>, seek_offset: u64) -> Vec<String> {
    let mut filter = format!("subtitles='{}'", escape_filter_path(burn_in.path));
    if let Some(index) = burn_in.stream_index {
        filter.push_str(&format!(":si={}", index));
    }
    filter.push_str(&format!(":force_style='{}'", SUBTITLE_STYLE));

    if seek_offset == 0 {
        return vec![filter];
    }
    vec![
        format!("setpts=PTS+{}/TB", seek_offset),
        filter,
        format!("setpts=PTS-{}/TB", seek_offset),
    ]
}

/// Escape a filesystem path for use inside a quoted filter argument
///
/// Backslashes become forward slashes, drive/colon separators are escaped
/// and single quotes are closed, escaped and reopened.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}
