//! Transcoding HTTP stream server
//!
//! Two routes:
//! - `GET /stream.mp4` spawns one transcoder per request from a snapshot of
//!   the shared [`StreamConfig`] and streams its stdout as fragmented MP4
//! - `GET /thumb.jpg` serves the thumbnail of the current local item
//!
//! The transcoder guard lives inside the response body, so it dies with the
//! connection. [`StreamServer::cancel_streams`] ends every in-flight body on
//! stop, skip and seek.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::SubtitleSelection;
use crate::stream::settings::{MediaSource, SharedStreamConfig, StreamConfig};
use crate::transcode::{build_filter_graph, BurnIn, FilterSpec, TranscodeProcess};

pub const STREAM_PATH: &str = "/stream.mp4";
pub const THUMB_PATH: &str = "/thumb.jpg";
pub const VIDEO_MIME: &str = "video/mp4";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side knobs that do not change per item
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub ffmpeg_path: String,
    /// Bytes per read from the transcoder
    pub chunk_size: usize,
    pub kill_grace: Duration,
    pub thumbnail_path: PathBuf,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            chunk_size: config.chunk_size.max(1024),
            kill_grace: config.kill_grace(),
            thumbnail_path: config.thumbnail_path(),
        }
    }
}

#[derive(Clone)]
struct ServerState {
    config: SharedStreamConfig,
    settings: Arc<ServerSettings>,
    /// Replaced (and the old one cancelled) to end in-flight streams
    streams: Arc<Mutex<CancellationToken>>,
}

// =============================================================================
// Transcoder Arguments
// =============================================================================

/// Full transcoder command line for one request
pub fn transcode_args(snapshot: &StreamConfig, source: &MediaSource) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-ss".into(),
        snapshot.seek_offset.to_string(),
    ];

    if let Some(headers) = source.headers() {
        args.extend(
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        if !headers.is_empty() {
            let joined: String = headers
                .iter()
                .map(|(k, v)| format!("{}: {}\r\n", k, v))
                .collect();
            args.push("-headers".into());
            args.push(joined);
        }
    }

    args.extend(snapshot.encoder.extra_input_args.iter().cloned());
    args.push("-i".into());
    args.push(source.input());

    let subtitles = match (&snapshot.subtitle, source) {
        (SubtitleSelection::None, _) => None,
        (SubtitleSelection::ExternalFile(path), _) => {
            if path.is_file() {
                Some(BurnIn {
                    path: path.as_path(),
                    stream_index: None,
                })
            } else {
                warn!("Subtitle file {} is missing, streaming without", path.display());
                None
            }
        }
        (SubtitleSelection::InternalStream(index), MediaSource::Local(path)) => Some(BurnIn {
            path: path.as_path(),
            stream_index: Some(*index),
        }),
        (SubtitleSelection::InternalStream(index), MediaSource::Remote { .. }) => {
            warn!("Embedded subtitle track {} is not available for remote media", index);
            None
        }
    };

    let graph = build_filter_graph(&FilterSpec {
        resolution: snapshot.resolution,
        aspect: snapshot.aspect,
        subtitles,
        seek_offset: snapshot.seek_offset,
        family: snapshot.encoder.family,
    });

    args.extend([
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "0:a:0?".into(),
        "-vf".into(),
        graph.to_string(),
        "-c:v".into(),
        snapshot.encoder.name.clone(),
    ]);
    args.extend(snapshot.encoder.family.preset_args().iter().map(|s| s.to_string()));
    args.extend([
        "-b:v".into(),
        snapshot.video_bitrate.clone(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        snapshot.audio_bitrate.clone(),
        "-f".into(),
        "mp4".into(),
        "-movflags".into(),
        "frag_keyframe+empty_moov+default_base_moof".into(),
        "pipe:1".into(),
    ]);
    args
}

/// Local sources must exist and be readable before a transcoder is spawned
async fn check_source(source: &MediaSource) -> Result<()> {
    let MediaSource::Local(path) = source else {
        return Ok(());
    };
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
    if !meta.is_file() {
        return Err(Error::SourceUnavailable(format!("{} is not a file", path.display())));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_handler(State(state): State<ServerState>) -> Response {
    // token before snapshot: a cancel that follows a config change also ends
    // any request that could have read the old values
    let cancelled = state.streams.lock().clone();
    let snapshot = state.config.snapshot();
    let Some(source) = snapshot.source.clone() else {
        return not_found("No media selected");
    };

    if let Err(e) = check_source(&source).await {
        warn!("{}", e);
        return not_found("Source unavailable");
    }

    let args = transcode_args(&snapshot, &source);
    debug!("Transcoder arguments: {:?}", args);

    let (guard, stdout) =
        match TranscodeProcess::spawn(&state.settings.ffmpeg_path, &args, state.settings.kill_grace) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start transcoder").into_response();
            }
        };

    info!(
        transcode = guard.id(),
        "Streaming {} from {}s",
        source,
        snapshot.seek_offset
    );

    let body = transcode_body(stdout, guard, cancelled, state.settings.chunk_size);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, VIDEO_MIME),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Response body copying transcoder output in fixed-size chunks
///
/// Ends on EOF, on cancellation, or when hyper drops it after a disconnect.
/// Any of the three drops the guard and with it the transcoder.
fn transcode_body(
    stdout: ChildStdout,
    guard: TranscodeProcess,
    cancel: CancellationToken,
    chunk_size: usize,
) -> Body {
    let chunks = ReaderStream::with_capacity(stdout, chunk_size).take_until(cancel.cancelled_owned());
    let body = stream::unfold((Box::pin(chunks), guard), |(mut chunks, guard)| async move {
        let chunk = chunks.next().await?;
        Some((chunk, (chunks, guard)))
    });
    Body::from_stream(body)
}

async fn thumb_handler(State(state): State<ServerState>) -> Response {
    match tokio::fs::read(&state.settings.thumbnail_path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => not_found("No thumbnail"),
    }
}

fn not_found(message: &'static str) -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        message,
    )
        .into_response()
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route(STREAM_PATH, get(stream_handler))
        .route(THUMB_PATH, get(thumb_handler))
        .with_state(state)
}

// =============================================================================
// Server Handle
// =============================================================================

/// Running stream server
pub struct StreamServer {
    local_addr: SocketAddr,
    streams: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Bind and start serving in the background (port 0 picks a free port)
    pub async fn bind(
        addr: SocketAddr,
        config: SharedStreamConfig,
        settings: ServerSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let streams = Arc::new(Mutex::new(CancellationToken::new()));
        let shutdown = CancellationToken::new();
        let app = router(ServerState {
            config,
            settings: Arc::new(settings),
            streams: streams.clone(),
        });

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Stream server failed: {}", e);
            }
        });

        info!("Stream server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            streams,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// End every in-flight stream; later requests are unaffected
    pub fn cancel_streams(&self) {
        let previous = std::mem::replace(&mut *self.streams.lock(), CancellationToken::new());
        previous.cancel();
    }

    /// Stream URL with a fresh cache-buster so the receiver opens a new connection
    pub fn stream_url(&self, host: IpAddr) -> String {
        format!(
            "http://{}{}?t={}",
            SocketAddr::new(host, self.local_addr.port()),
            STREAM_PATH,
            uuid::Uuid::new_v4().simple()
        )
    }

    pub fn thumb_url(&self, host: IpAddr) -> String {
        format!(
            "http://{}{}",
            SocketAddr::new(host, self.local_addr.port()),
            THUMB_PATH
        )
    }

    /// Stop accepting connections and end in-flight streams
    pub async fn shutdown(mut self) {
        self.cancel_streams();
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Stream server did not shut down in time");
            }
        }
        info!("Stream server stopped");
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.streams.lock().cancel();
        self.shutdown.cancel();
    }
}

/// Address the receiver should use to reach this machine
pub fn advertise_host(config: &Config) -> IpAddr {
    if let Some(addr) = config.advertise_address {
        return addr;
    }
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Could not detect LAN address ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// True if `path` could be served right now
pub fn is_servable(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}
