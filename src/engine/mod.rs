//! Playback synchronization engine
//!
//! [`PlaybackController`] is the command surface used by the front end. It
//! owns the queue, the shared stream parameters and the stream server, and
//! runs one worker task per playback run that:
//! - dequeues items and tells the receiver to play them
//! - polls the receiver once per interval and reports the timeline position
//! - restarts the stream for seeks and format changes
//! - decides when an item has really finished
//!
//! All writes to the stream parameters happen on the worker while it runs,
//! so the server always sees them before the play command that needs them.

mod worker;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{AspectRatio, PlayableItem, RemoteMedia, Resolution, SubtitleOption, SubtitleSelection};
use crate::queue::Queue;
use crate::receiver::Receiver;
use crate::stream::{advertise_host, ServerSettings, SharedStreamConfig, StreamConfig, StreamServer};
use crate::transcode::{detect_encoder, EncoderChoice};

use worker::Worker;

/// Fixed delays of the synchronization heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimings {
    /// Time between receiver status polls
    pub poll_interval: Duration,
    /// Polls are ignored this long after every play command
    pub start_grace: Duration,
    /// Reported position is ignored this long after a seek
    pub seek_cooldown: Duration,
    /// A reported IDLE does not count as finished this long after a seek
    pub seek_lock: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            start_grace: Duration::from_secs(3),
            seek_cooldown: Duration::from_secs(5),
            seek_lock: Duration::from_secs(8),
        }
    }
}

/// Receives engine progress; every method defaults to doing nothing
pub trait PlaybackObserver: Send + Sync {
    fn on_status_text(&self, _text: &str) {}
    /// Position on the media timeline, in seconds
    fn on_elapsed(&self, _seconds: f64) {}
    fn on_duration(&self, _seconds: f64) {}
    fn on_queue_changed(&self, _titles: &[String]) {}
    fn on_subtitle_options_changed(&self, _labels: &[String]) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PlaybackObserver for NullObserver {}

/// Everything the engine needs from the configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub bind_addr: SocketAddr,
    /// Host placed into URLs sent to the receiver
    pub advertise_host: IpAddr,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub server: ServerSettings,
    pub timings: EngineTimings,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: SocketAddr::new(config.bind_address, config.port),
            advertise_host: advertise_host(config),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            server: ServerSettings::from_config(config),
            timings: config.timings(),
        }
    }

    pub fn thumbnail_path(&self) -> &PathBuf {
        &self.server.thumbnail_path
    }
}

/// How a playback run ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunOutcome {
    /// The queue ran out (also reported before any run)
    #[default]
    Finished,
    /// Ended by stop or shutdown
    Stopped,
    /// The receiver never became ready
    ReceiverUnavailable(String),
    /// An item could not be started
    Failed(String),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::ReceiverUnavailable(_) | RunOutcome::Failed(_))
    }
}

/// Commands handled by the worker, in arrival order
#[derive(Debug, Clone, PartialEq)]
enum EngineCommand {
    Stop,
    Skip,
    Seek(f64),
    SelectSubtitle(SubtitleSelection),
    SetResolution(Resolution),
    SetAspect(AspectRatio),
    SetVolume(f32),
}

impl EngineCommand {
    /// Changes that only take effect by restarting the stream
    fn restarts_stream(&self) -> bool {
        matches!(
            self,
            EngineCommand::Seek(_)
                | EngineCommand::SelectSubtitle(_)
                | EngineCommand::SetResolution(_)
                | EngineCommand::SetAspect(_)
        )
    }
}

struct WorkerHandle {
    id: u64,
    commands: mpsc::UnboundedSender<EngineCommand>,
    task: JoinHandle<()>,
}

struct Inner {
    queue: Queue,
    stream_config: SharedStreamConfig,
    observer: Arc<dyn PlaybackObserver>,
    options: EngineOptions,
    server: tokio::sync::Mutex<Option<StreamServer>>,
    worker: Mutex<Option<WorkerHandle>>,
    next_worker_id: AtomicU64,
    /// Bumped for every item; background probes compare before reporting
    item_generation: AtomicU64,
    subtitle_options: Mutex<Vec<SubtitleOption>>,
    /// Declared or probed duration of the current item
    duration: Mutex<Option<f64>>,
    scrubbing: AtomicBool,
    /// true while a worker is running
    running: watch::Sender<bool>,
    /// Set by the worker before it clears `running`
    outcome: Mutex<RunOutcome>,
}

impl Inner {
    fn notify_queue(&self) {
        self.observer.on_queue_changed(&self.queue.titles());
    }

    fn status(&self, text: &str) {
        debug!(target: "reelcast::status", "{}", text);
        self.observer.on_status_text(text);
    }

    /// Apply a command directly while no worker owns the parameters
    fn apply_idle(self: &Arc<Self>, command: EngineCommand) {
        match command {
            EngineCommand::Stop if self.queue.is_empty() => self.release_server(),
            EngineCommand::SelectSubtitle(selection) => self.stream_config.set_subtitle(selection),
            EngineCommand::SetResolution(resolution) => {
                self.stream_config.update(|c| c.resolution = resolution)
            }
            EngineCommand::SetAspect(aspect) => self.stream_config.update(|c| c.aspect = aspect),
            other => debug!("Ignoring {:?} while idle", other),
        }
    }

    /// Base URL parts for the receiver, binding the server on first use
    async fn ensure_server(&self) -> Result<(String, String)> {
        let mut server = self.server.lock().await;
        if server.is_none() {
            let bound = StreamServer::bind(
                self.options.bind_addr,
                self.stream_config.clone(),
                self.options.server.clone(),
            )
            .await?;
            *server = Some(bound);
        }
        match server.as_ref() {
            Some(s) => Ok((
                s.stream_url(self.options.advertise_host),
                s.thumb_url(self.options.advertise_host),
            )),
            None => Err(Error::TranscodeFailed("stream server unavailable".to_string())),
        }
    }

    async fn cancel_streams(&self) {
        if let Some(server) = self.server.lock().await.as_ref() {
            server.cancel_streams();
        }
    }

    /// Drop the server from a sync context; shutdown finishes in the background
    fn release_server(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // dropping cancels the listener and every stream
            if let Ok(mut slot) = self.server.try_lock() {
                slot.take();
            }
            return;
        };
        match self.server.try_lock() {
            Ok(mut slot) => {
                if let Some(server) = slot.take() {
                    runtime.spawn(server.shutdown());
                }
            }
            Err(_) => {
                let inner = self.clone();
                runtime.spawn(async move { inner.shutdown_server().await });
            }
        }
    }

    async fn shutdown_server(&self) {
        if let Some(server) = self.server.lock().await.take() {
            server.shutdown().await;
        }
    }
}

/// Command surface of the engine
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

impl PlaybackController {
    pub fn new(config: &Config, observer: Arc<dyn PlaybackObserver>) -> Self {
        Self::with_options(
            EngineOptions::from_config(config),
            StreamConfig::from_config(config),
            observer,
        )
    }

    pub fn with_options(
        options: EngineOptions,
        stream_config: StreamConfig,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Queue::new(),
                stream_config: SharedStreamConfig::new(stream_config),
                observer,
                options,
                server: tokio::sync::Mutex::new(None),
                worker: Mutex::new(None),
                next_worker_id: AtomicU64::new(1),
                item_generation: AtomicU64::new(0),
                subtitle_options: Mutex::new(Vec::new()),
                duration: Mutex::new(None),
                scrubbing: AtomicBool::new(false),
                running: watch::Sender::new(false),
                outcome: Mutex::new(RunOutcome::default()),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    pub fn enqueue_local(&self, path: impl Into<PathBuf>) {
        self.enqueue(PlayableItem::local(path));
    }

    pub fn enqueue_remote(&self, media: RemoteMedia) {
        self.enqueue(PlayableItem::RemoteMedia(media));
    }

    pub fn enqueue(&self, item: PlayableItem) {
        debug!("Enqueued {}", item);
        self.inner.queue.enqueue(item);
        self.inner.notify_queue();
    }

    pub fn clear_queue(&self) {
        self.inner.queue.clear();
        self.inner.notify_queue();
    }

    pub fn queue_titles(&self) -> Vec<String> {
        self.inner.queue.titles()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    // -------------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------------

    /// Start playing the queue on `receiver`; no-op if already running
    pub fn start(&self, receiver: Arc<dyn Receiver>) {
        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            debug!("Playback already running");
            return;
        }

        let id = self.inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.running.send_replace(true);
        let task = tokio::spawn(Worker::new(id, self.inner.clone(), receiver, rx).run());
        *worker = Some(WorkerHandle {
            id,
            commands: tx,
            task,
        });
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// End the current item and return to idle; the queue is kept
    ///
    /// With an empty queue the stream server is released as well.
    pub fn stop(&self) {
        self.send(EngineCommand::Stop);
    }

    /// Move on to the next queued item
    pub fn skip(&self) {
        self.send(EngineCommand::Skip);
    }

    /// Jump to `seconds` on the media timeline (ignored while idle)
    pub fn seek(&self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        self.send(EngineCommand::Seek(seconds.max(0.0)));
    }

    pub fn select_subtitle(&self, selection: SubtitleSelection) {
        self.send(EngineCommand::SelectSubtitle(selection));
    }

    pub fn set_resolution(&self, width: u32, height: u32) {
        self.send(EngineCommand::SetResolution(Resolution::new(width, height)));
    }

    pub fn set_aspect(&self, aspect: AspectRatio) {
        self.send(EngineCommand::SetAspect(aspect));
    }

    /// Receiver volume in `0.0..=1.0`
    pub fn set_volume(&self, level: f32) {
        self.send(EngineCommand::SetVolume(level.clamp(0.0, 1.0)));
    }

    /// While scrubbing, polled positions are not reported
    pub fn set_scrubbing(&self, scrubbing: bool) {
        self.inner.scrubbing.store(scrubbing, Ordering::Relaxed);
    }

    /// Duration of the current item, once known
    pub fn duration(&self) -> Option<f64> {
        *self.inner.duration.lock()
    }

    /// Subtitle choices discovered for the current item
    pub fn subtitle_options(&self) -> Vec<SubtitleOption> {
        self.inner.subtitle_options.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Setup / Teardown
    // -------------------------------------------------------------------------

    /// Run encoder detection and remember the result for future streams
    pub async fn detect_encoder(&self) -> EncoderChoice {
        let choice = detect_encoder(&self.inner.options.ffmpeg_path).await;
        self.inner.stream_config.set_encoder(choice.clone());
        choice
    }

    pub fn stream_config(&self) -> SharedStreamConfig {
        self.inner.stream_config.clone()
    }

    /// Address the stream server is bound to, once started
    pub async fn server_addr(&self) -> Option<SocketAddr> {
        self.inner.server.lock().await.as_ref().map(|s| s.local_addr())
    }

    /// Wait for the current run to end and report how it ended
    pub async fn wait_idle(&self) -> RunOutcome {
        let mut running = self.inner.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
        self.inner.outcome.lock().clone()
    }

    /// Stop playback and release the stream server
    pub async fn shutdown(&self) {
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.commands.send(EngineCommand::Stop);
            let _ = handle.task.await;
        }
        self.inner.shutdown_server().await;
    }

    fn send(&self, command: EngineCommand) {
        let worker = self.inner.worker.lock();
        match worker.as_ref() {
            Some(handle) => {
                if let Err(mpsc::error::SendError(command)) = handle.commands.send(command) {
                    self.inner.apply_idle(command);
                }
            }
            None => self.inner.apply_idle(command),
        }
    }
}
