//! The task behind [`PlaybackController`](super::PlaybackController)
//!
//! One worker lives from `start` until the queue runs dry or the user stops.
//! It alternates between handling commands and polling the receiver; the
//! poll result decides position reporting and end-of-item.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{format_timestamp, PlayableItem, ReceiverState, ReceiverStatus, SubtitleSelection};
use crate::receiver::{MediaMetadata, Receiver};
use crate::stream::server::{is_servable, VIDEO_MIME};
use crate::stream::MediaSource;
use crate::transcode::probe::{discover_subtitle_options, probe_duration, render_thumbnail};

use super::{EngineCommand, Inner, RunOutcome};

/// What the run does after an item ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Stop,
}

/// Live state of the item being played
#[derive(Debug)]
struct Session {
    title: String,
    local: bool,
    /// Last reported timeline position
    position: f64,
    /// Polls before this are ignored (set after every play command)
    grace_until: Instant,
    /// Receiver position is stale until then
    cooldown_until: Option<Instant>,
    /// IDLE is not trusted until then
    lock_until: Option<Instant>,
    /// Skip requested; the next poll ends the item
    forced_idle: bool,
    last_state: Option<ReceiverState>,
}

impl Session {
    fn new(title: String, local: bool, grace_until: Instant) -> Self {
        Self {
            title,
            local,
            position: 0.0,
            grace_until,
            cooldown_until: None,
            lock_until: None,
            forced_idle: false,
            last_state: None,
        }
    }
}

pub(super) struct Worker {
    id: u64,
    inner: Arc<Inner>,
    receiver: Arc<dyn Receiver>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    /// Commands read ahead while coalescing, handled before the channel
    pending: VecDeque<EngineCommand>,
}

impl Worker {
    pub(super) fn new(
        id: u64,
        inner: Arc<Inner>,
        receiver: Arc<dyn Receiver>,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Self {
        Self {
            id,
            inner,
            receiver,
            commands,
            pending: VecDeque::new(),
        }
    }

    pub(super) async fn run(mut self) {
        self.inner
            .status(&format!("Connecting to {}", self.receiver.name()));

        let outcome = match self.receiver.wait_ready().await {
            Ok(()) => self.play_queue().await,
            Err(e) => {
                self.inner.status(&format!("Receiver not ready: {}", e));
                RunOutcome::ReceiverUnavailable(e.to_string())
            }
        };

        self.finish(outcome);
    }

    async fn play_queue(&mut self) -> RunOutcome {
        loop {
            let mut session = match self.begin_next().await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    self.inner.status("Queue finished");
                    return RunOutcome::Finished;
                }
                Err(e) => {
                    self.inner.status(&format!("Playback failed: {}", e));
                    return RunOutcome::Failed(e.to_string());
                }
            };

            if self.track(&mut session).await == Flow::Stop {
                return RunOutcome::Stopped;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Item start
    // -------------------------------------------------------------------------

    /// Dequeue until an item starts; unavailable sources are reported and skipped
    async fn begin_next(&mut self) -> Result<Option<Session>> {
        loop {
            let Some(item) = self.inner.queue.dequeue_front() else {
                return Ok(None);
            };
            self.inner.notify_queue();

            match self.begin(item).await {
                Ok(session) => return Ok(Some(session)),
                Err(Error::SourceUnavailable(reason)) => {
                    self.inner.status(&format!("Source unavailable, skipping: {}", reason));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn begin(&mut self, item: PlayableItem) -> Result<Session> {
        let generation = self.inner.item_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (source, subtitle) = match &item {
            PlayableItem::LocalFile { path } => {
                if !is_servable(path) {
                    return Err(Error::SourceUnavailable(path.display().to_string()));
                }
                (MediaSource::Local(path.clone()), SubtitleSelection::None)
            }
            PlayableItem::RemoteMedia(remote) => (
                MediaSource::Remote {
                    url: remote.url.clone(),
                    headers: remote.headers.clone(),
                },
                remote.subtitle.clone(),
            ),
        };

        self.inner.stream_config.begin_item(source, subtitle);
        self.absorb_format_changes();

        *self.inner.duration.lock() = item.declared_duration();
        self.inner.subtitle_options.lock().clear();
        self.inner.observer.on_subtitle_options_changed(&[]);
        let _ = tokio::fs::remove_file(self.inner.options.thumbnail_path()).await;

        if let PlayableItem::LocalFile { path } = &item {
            self.spawn_probes(path.clone(), generation);
        }

        self.inner.ensure_server().await?;

        if let Some(duration) = item.declared_duration() {
            self.inner.observer.on_duration(duration);
        }
        self.inner.observer.on_elapsed(0.0);

        let session = Session::new(
            item.title(),
            matches!(item, PlayableItem::LocalFile { .. }),
            Instant::now() + self.inner.options.timings.start_grace,
        );
        self.inner.status(&format!("Starting: {}", session.title));
        self.send_play(&session).await;
        Ok(session)
    }

    /// Fold format changes sent before the first play into the initial stream
    fn absorb_format_changes(&mut self) {
        if !self.pending.is_empty() {
            return;
        }
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::SelectSubtitle(_)
                | EngineCommand::SetResolution(_)
                | EngineCommand::SetAspect(_) => self.inner.apply_idle(command),
                other => {
                    self.pending.push_back(other);
                    break;
                }
            }
        }
    }

    /// Duration, subtitle options and thumbnail for a local file, off the loop
    fn spawn_probes(&self, path: PathBuf, generation: u64) {
        let inner = self.inner.clone();
        let media = path.clone();
        tokio::spawn(async move {
            match probe_duration(&inner.options.ffprobe_path, &media.to_string_lossy()).await {
                Ok(duration) if inner.item_generation.load(Ordering::SeqCst) == generation => {
                    debug!("Duration of {}: {:.1}s", media.display(), duration);
                    *inner.duration.lock() = Some(duration);
                    inner.observer.on_duration(duration);
                }
                Ok(_) => {}
                Err(e) => warn!("Duration probe failed for {}: {}", media.display(), e),
            }
        });

        let inner = self.inner.clone();
        let media = path.clone();
        tokio::spawn(async move {
            let options = discover_subtitle_options(&inner.options.ffprobe_path, &media).await;
            if inner.item_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let labels: Vec<String> = options.iter().map(|o| o.label.clone()).collect();
            *inner.subtitle_options.lock() = options;
            inner.observer.on_subtitle_options_changed(&labels);
        });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let output = inner.options.thumbnail_path().clone();
            if let Err(e) = render_thumbnail(&inner.options.ffmpeg_path, &path, &output).await {
                debug!("No thumbnail for {}: {}", path.display(), e);
            }
        });
    }

    /// Tell the receiver to open a fresh stream URL
    async fn send_play(&self, session: &Session) {
        let (stream_url, thumb_url) = match self.inner.ensure_server().await {
            Ok(urls) => urls,
            Err(e) => {
                self.inner.status(&format!("Stream server unavailable: {}", e));
                return;
            }
        };

        let metadata = MediaMetadata {
            thumbnail_url: session.local.then_some(thumb_url),
            duration: *self.inner.duration.lock(),
        };

        debug!("Play {} -> {}", session.title, stream_url);
        if let Err(e) = self
            .receiver
            .play_media(&stream_url, &session.title, VIDEO_MIME, &metadata)
            .await
        {
            self.inner.status(&format!("Play failed: {}", e));
        }
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    async fn track(&mut self, session: &mut Session) -> Flow {
        let interval = self.inner.options.timings.poll_interval;
        let mut next_poll = Instant::now() + interval;

        loop {
            if let Some(command) = self.pending.pop_front() {
                if let Some(flow) = self.handle(command, session).await {
                    return flow;
                }
                continue;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(flow) = self.handle(command, session).await {
                            return flow;
                        }
                    }
                    None => return Flow::Stop,
                },
                _ = sleep_until(next_poll) => {
                    next_poll += interval;
                    let now = Instant::now();
                    if next_poll <= now {
                        next_poll = now + interval;
                    }
                    if let Some(flow) = self.poll(session).await {
                        return flow;
                    }
                }
            }
        }
    }

    async fn poll(&self, session: &mut Session) -> Option<Flow> {
        if !session.forced_idle && Instant::now() < session.grace_until {
            return None;
        }

        let status = if session.forced_idle {
            ReceiverStatus::idle()
        } else {
            match self.receiver.status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Status poll failed: {}", e);
                    return None;
                }
            }
        };
        let now = Instant::now();

        if session.last_state != Some(status.state) {
            session.last_state = Some(status.state);
            if status.state != ReceiverState::Idle {
                self.inner
                    .status(&format!("{}: {}", state_label(status.state), session.title));
            }
        }

        if status.state == ReceiverState::Idle {
            if session.lock_until.is_some_and(|until| now < until) {
                debug!("Receiver idle inside the seek lock window");
                return None;
            }
            info!("Finished {}", session.title);
            return Some(Flow::Next);
        }

        let cooling = session.cooldown_until.is_some_and(|until| now < until);
        if !cooling && !self.inner.scrubbing.load(Ordering::Relaxed) {
            let offset = self.inner.stream_config.seek_offset() as f64;
            session.position = offset + status.current_time.max(0.0);
            self.inner.observer.on_elapsed(session.position);
        }
        None
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn handle(&mut self, command: EngineCommand, session: &mut Session) -> Option<Flow> {
        match command {
            EngineCommand::Stop => Some(self.stop().await),
            EngineCommand::Skip => {
                self.skip(session).await;
                None
            }
            EngineCommand::SetVolume(level) => {
                if let Err(e) = self.receiver.set_volume(level).await {
                    self.inner.status(&format!("Volume change failed: {}", e));
                }
                None
            }
            command => {
                self.restart(command, session).await;
                None
            }
        }
    }

    async fn stop(&mut self) -> Flow {
        if let Err(e) = self.receiver.stop().await {
            self.inner.status(&format!("Stop failed: {}", e));
        }
        self.inner.cancel_streams().await;
        if self.inner.queue.is_empty() {
            self.inner.shutdown_server().await;
        }
        self.inner.status("Stopped");
        Flow::Stop
    }

    async fn skip(&mut self, session: &mut Session) {
        self.inner.status(&format!("Skipping {}", session.title));
        if let Err(e) = self.receiver.stop().await {
            warn!("Stop before skip failed: {}", e);
        }
        self.inner.cancel_streams().await;
        session.lock_until = None;
        session.forced_idle = true;
    }

    /// Restart the stream for a seek or a format change
    ///
    /// Restart-type commands already waiting are folded in, so the last
    /// seek target wins and only one play command goes out.
    async fn restart(&mut self, first: EngineCommand, session: &mut Session) {
        let mut target = session.position;
        let mut sought = self.apply_restart(first, &mut target);

        if self.pending.is_empty() {
            while let Ok(next) = self.commands.try_recv() {
                if next.restarts_stream() {
                    sought |= self.apply_restart(next, &mut target);
                } else {
                    self.pending.push_back(next);
                    break;
                }
            }
        }

        if let Some(duration) = *self.inner.duration.lock() {
            if duration >= 1.0 {
                target = target.min(duration - 1.0);
            }
        }
        let offset = target.max(0.0).floor() as u64;
        self.inner.stream_config.set_seek_offset(offset);
        self.inner.cancel_streams().await;

        let timings = self.inner.options.timings;
        let now = Instant::now();
        session.position = offset as f64;
        session.grace_until = now + timings.start_grace;
        session.cooldown_until = Some(now + timings.seek_cooldown);
        session.lock_until = Some(now + timings.seek_lock);
        session.forced_idle = false;

        self.inner.observer.on_elapsed(session.position);
        let verb = if sought { "Seeking to" } else { "Restarting at" };
        self.inner
            .status(&format!("{} {}", verb, format_timestamp(session.position)));
        self.send_play(session).await;
    }

    /// Apply one restart-type command, true if it was a seek
    fn apply_restart(&self, command: EngineCommand, target: &mut f64) -> bool {
        match command {
            EngineCommand::Seek(seconds) => {
                *target = seconds;
                return true;
            }
            EngineCommand::SelectSubtitle(selection) => {
                self.inner.status(&format!("Subtitles: {}", selection));
                self.inner.stream_config.set_subtitle(selection);
            }
            EngineCommand::SetResolution(resolution) => {
                info!("Resolution {}", resolution);
                self.inner.stream_config.update(|c| c.resolution = resolution);
            }
            EngineCommand::SetAspect(aspect) => {
                info!("Aspect ratio {}", aspect);
                self.inner.stream_config.update(|c| c.aspect = aspect);
            }
            other => debug!("Not a restart command: {:?}", other),
        }
        false
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Hand the stream parameters back to the controller
    fn finish(mut self, outcome: RunOutcome) {
        let mut worker = self.inner.worker.lock();
        let current = worker.as_ref().map(|w| w.id);
        if current.is_some() && current != Some(self.id) {
            // a newer run already owns the engine
            return;
        }
        *worker = None;

        self.commands.close();
        while let Some(command) = self.pending.pop_front() {
            self.inner.apply_idle(command);
        }
        while let Ok(command) = self.commands.try_recv() {
            self.inner.apply_idle(command);
        }
        debug!("Playback worker {} finished: {:?}", self.id, outcome);
        *self.inner.outcome.lock() = outcome;
        self.inner.running.send_replace(false);
    }
}

fn state_label(state: ReceiverState) -> &'static str {
    match state {
        ReceiverState::Playing => "Playing",
        ReceiverState::Buffering => "Buffering",
        ReceiverState::Paused => "Paused",
        ReceiverState::Idle => "Idle",
    }
}
