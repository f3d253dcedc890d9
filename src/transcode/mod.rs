//! Transcoding toolbox
//!
//! - Encoder: hardware encoder detection with a software fallback
//! - Filter: `-vf` graph construction (scale, aspect, subtitle burn-in)
//! - Probe: duration, subtitle tracks, sidecar files, thumbnails
//! - Process: transcoder child guard

pub mod encoder;
pub mod filter;
pub mod probe;
pub mod process;

pub use encoder::{detect_encoder, EncoderChoice, EncoderFamily};
pub use filter::{build_filter_graph, BurnIn, FilterGraph, FilterSpec};
pub use process::TranscodeProcess;
