//! Streaming infrastructure
//!
//! - Settings: the shared, snapshot-read transcoding parameters
//! - Server: HTTP endpoint feeding transcoder output to the receiver

pub mod server;
pub mod settings;

pub use server::{advertise_host, ServerSettings, StreamServer};
pub use settings::{MediaSource, SharedStreamConfig, StreamConfig};
