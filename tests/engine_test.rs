//! Playback engine tests
//!
//! A scripted receiver stands in for the Chromecast and the tokio clock is
//! paused, so the grace, cooldown and lock windows are checked exactly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use reelcast::engine::{
    EngineOptions, EngineTimings, PlaybackController, PlaybackObserver, RunOutcome,
};
use reelcast::models::{AspectRatio, ReceiverStatus, RemoteMedia, Resolution, SubtitleSelection};
use reelcast::receiver::{MediaMetadata, Receiver};
use reelcast::stream::{ServerSettings, StreamConfig};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct ScriptedReceiver {
    status: Mutex<ReceiverStatus>,
    /// (url, title) of every play command
    plays: Mutex<Vec<(String, String)>>,
    stops: Mutex<usize>,
    volume: Mutex<Option<f32>>,
    /// wait_ready fails with this reason when set
    ready_error: Mutex<Option<String>>,
}

impl ScriptedReceiver {
    fn set_status(&self, status: ReceiverStatus) {
        *self.status.lock() = status;
    }

    fn plays(&self) -> Vec<(String, String)> {
        self.plays.lock().clone()
    }
}

#[async_trait]
impl Receiver for ScriptedReceiver {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn wait_ready(&self) -> reelcast::Result<()> {
        match self.ready_error.lock().clone() {
            Some(reason) => Err(reelcast::Error::receiver("connect", reason)),
            None => Ok(()),
        }
    }

    async fn play_media(
        &self,
        url: &str,
        title: &str,
        _content_type: &str,
        _metadata: &MediaMetadata,
    ) -> reelcast::Result<()> {
        self.plays.lock().push((url.to_string(), title.to_string()));
        Ok(())
    }

    async fn stop(&self) -> reelcast::Result<()> {
        *self.stops.lock() += 1;
        Ok(())
    }

    async fn set_volume(&self, level: f32) -> reelcast::Result<()> {
        *self.volume.lock() = Some(level);
        Ok(())
    }

    async fn status(&self) -> reelcast::Result<ReceiverStatus> {
        Ok(self.status.lock().clone())
    }
}

#[derive(Default)]
struct RecordingObserver {
    elapsed: Mutex<Vec<f64>>,
    status: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn last_elapsed(&self) -> Option<f64> {
        self.elapsed.lock().last().copied()
    }

    fn saw_status(&self, needle: &str) -> bool {
        self.status.lock().iter().any(|s| s.contains(needle))
    }
}

impl PlaybackObserver for RecordingObserver {
    fn on_status_text(&self, text: &str) {
        self.status.lock().push(text.to_string());
    }

    fn on_elapsed(&self, seconds: f64) {
        self.elapsed.lock().push(seconds);
    }
}

struct Harness {
    controller: PlaybackController,
    receiver: Arc<ScriptedReceiver>,
    observer: Arc<RecordingObserver>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let options = EngineOptions {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        advertise_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        ffprobe_path: "/nonexistent/ffprobe".to_string(),
        server: ServerSettings {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            chunk_size: 64 * 1024,
            kill_grace: Duration::from_millis(100),
            thumbnail_path: dir.path().join("thumb.jpg"),
        },
        timings: EngineTimings::default(),
    };
    let observer = Arc::new(RecordingObserver::default());
    let controller =
        PlaybackController::with_options(options, StreamConfig::default(), observer.clone());
    Harness {
        controller,
        receiver: Arc::new(ScriptedReceiver::default()),
        observer,
        _dir: dir,
    }
}

fn remote(title: &str) -> RemoteMedia {
    let mut media = RemoteMedia::new(format!("https://cdn.example/{}.mp4", title), title);
    media.duration = Some(600.0);
    media
}

async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

// =============================================================================
// Position Reporting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_polls_ignored_during_start_grace() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(5.2));
    h.controller.start(h.receiver.clone());

    advance(2.5).await;
    assert_eq!(h.observer.last_elapsed(), Some(0.0));

    advance(1.0).await;
    let elapsed = h.observer.last_elapsed().unwrap();
    assert!((elapsed - 5.2).abs() < 1e-9, "got {}", elapsed);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_position_adds_seek_offset() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(30.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.seek(120.0);
    h.receiver.set_status(ReceiverStatus::playing(5.2));
    advance(0.5).await;
    assert_eq!(h.observer.last_elapsed(), Some(120.0));
    assert_eq!(h.controller.stream_config().seek_offset(), 120);

    // cooldown keeps the displayed position put
    advance(3.0).await;
    assert_eq!(h.observer.last_elapsed(), Some(120.0));

    advance(3.0).await;
    let elapsed = h.observer.last_elapsed().unwrap();
    assert!((elapsed - 125.2).abs() < 1e-9, "got {}", elapsed);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scrubbing_suppresses_position() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(10.0));
    h.controller.set_scrubbing(true);
    h.controller.start(h.receiver.clone());

    advance(5.5).await;
    assert_eq!(h.observer.last_elapsed(), Some(0.0));

    h.controller.set_scrubbing(false);
    advance(1.0).await;
    assert_eq!(h.observer.last_elapsed(), Some(10.0));

    h.controller.shutdown().await;
}

// =============================================================================
// Seeking
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_seek_restarts_with_fresh_url() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.seek(300.0);
    advance(0.5).await;

    let plays = h.receiver.plays();
    assert_eq!(plays.len(), 2);
    assert_ne!(plays[0].0, plays[1].0, "seek must use a new stream URL");
    assert_eq!(plays[1].1, "A");
    assert_eq!(h.controller.stream_config().seek_offset(), 300);
    assert!(h.observer.saw_status("Seeking to 00:05:00"));

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_past_duration_is_clamped() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.seek(10_000.0);
    advance(0.5).await;
    assert_eq!(h.controller.stream_config().seek_offset(), 599);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_seeks_coalesce() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.seek(100.0);
    h.controller.seek(200.0);
    h.controller.seek(250.0);
    advance(0.5).await;

    assert_eq!(h.receiver.plays().len(), 2);
    assert_eq!(h.controller.stream_config().seek_offset(), 250);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_after_seek_waits_for_lock_window() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.controller.enqueue_remote(remote("B"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.seek(300.0);
    h.receiver.set_status(ReceiverStatus::idle());

    advance(5.0).await;
    assert_eq!(h.controller.queue_len(), 1, "IDLE inside the lock must not advance");
    assert_eq!(h.receiver.plays().len(), 2);

    advance(4.0).await;
    assert_eq!(h.controller.queue_len(), 0);
    let plays = h.receiver.plays();
    assert_eq!(plays.len(), 3);
    assert_eq!(plays[2].1, "B");
    assert_eq!(h.controller.stream_config().seek_offset(), 0);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_aspect_change_restarts_at_displayed_position() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(42.7));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;
    let elapsed = h.observer.last_elapsed().unwrap();
    assert!((elapsed - 42.7).abs() < 1e-9, "got {}", elapsed);

    h.controller.set_aspect(AspectRatio::STANDARD);
    h.controller.set_resolution(640, 480);
    advance(0.5).await;

    let plays = h.receiver.plays();
    assert_eq!(plays.len(), 2, "both changes restart the stream once");
    assert_ne!(plays[0].0, plays[1].0);
    let snapshot = h.controller.stream_config().snapshot();
    assert_eq!(snapshot.seek_offset, 42);
    assert_eq!(snapshot.aspect, AspectRatio::STANDARD);
    assert_eq!(snapshot.resolution, Resolution::SD480);
    assert!(h.observer.saw_status("Restarting at 00:00:42"));

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subtitle_change_restarts_at_displayed_position() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(42.7));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.select_subtitle(SubtitleSelection::InternalStream(2));
    advance(0.5).await;

    assert_eq!(h.receiver.plays().len(), 2);
    let snapshot = h.controller.stream_config().snapshot();
    assert_eq!(snapshot.seek_offset, 42);
    assert_eq!(snapshot.subtitle, SubtitleSelection::InternalStream(2));
    assert!(h.observer.saw_status("Subtitles: Track #2"));

    h.controller.shutdown().await;
}

// =============================================================================
// Queue Progression
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_after_grace_finishes_queue() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::idle());
    h.controller.start(h.receiver.clone());
    assert!(h.controller.is_running());

    assert_eq!(h.controller.wait_idle().await, RunOutcome::Finished);
    assert!(!h.controller.is_running());
    assert!(h.observer.saw_status("Queue finished"));
    assert_eq!(h.receiver.plays().len(), 1);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_skip_moves_to_next_item() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.controller.enqueue_remote(remote("B"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.skip();
    advance(1.5).await;

    let plays = h.receiver.plays();
    assert_eq!(plays.last().map(|p| p.1.as_str()), Some("B"));
    assert_eq!(*h.receiver.stops.lock(), 1);

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_queue() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.controller.enqueue_remote(remote("B"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(3.5).await;

    h.controller.stop();
    assert_eq!(h.controller.wait_idle().await, RunOutcome::Stopped);

    assert!(!h.controller.is_running());
    assert_eq!(h.controller.queue_titles(), vec!["B"]);
    assert!(h.observer.saw_status("Stopped"));
    // items are still queued, so the server stays up
    assert!(h.controller.server_addr().await.is_some());

    h.controller.shutdown().await;
    assert!(h.controller.server_addr().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_queue_end_releases_server() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::idle());
    h.controller.start(h.receiver.clone());

    assert_eq!(h.controller.wait_idle().await, RunOutcome::Finished);
    // a natural end keeps the server for the next start
    assert!(h.controller.server_addr().await.is_some());

    h.controller.stop();
    advance(1.0).await;
    assert!(h.controller.server_addr().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_idle_with_queued_items_keeps_server() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::idle());
    h.controller.start(h.receiver.clone());
    h.controller.wait_idle().await;

    h.controller.enqueue_remote(remote("B"));
    h.controller.stop();
    advance(1.0).await;
    assert!(h.controller.server_addr().await.is_some());

    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unready_receiver_fails_the_run() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    *h.receiver.ready_error.lock() = Some("device not found".to_string());
    h.controller.start(h.receiver.clone());

    let outcome = h.controller.wait_idle().await;
    assert!(outcome.is_failure());
    match outcome {
        RunOutcome::ReceiverUnavailable(reason) => {
            assert!(reason.contains("device not found"), "{}", reason)
        }
        other => panic!("Expected ReceiverUnavailable, got {:?}", other),
    }
    assert!(h.receiver.plays().is_empty());
    assert_eq!(h.controller.queue_len(), 1);
    assert!(h.observer.saw_status("Receiver not ready"));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_local_file_is_skipped() {
    let h = harness();
    h.controller.enqueue_local("/nonexistent/missing.mkv");
    h.controller.enqueue_remote(remote("B"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(0.5).await;

    let plays = h.receiver.plays();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].1, "B");
    assert!(h.observer.saw_status("Source unavailable"));

    h.controller.shutdown().await;
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_commands_while_idle() {
    let h = harness();
    h.controller.seek(100.0);
    h.controller.select_subtitle(SubtitleSelection::InternalStream(1));
    h.controller.set_resolution(640, 480);

    let snapshot = h.controller.stream_config().snapshot();
    assert_eq!(snapshot.seek_offset, 0, "seek is ignored while idle");
    assert_eq!(snapshot.subtitle, SubtitleSelection::InternalStream(1));
    assert_eq!(snapshot.resolution.width, 640);
    assert!(!h.controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_volume_is_forwarded() {
    let h = harness();
    h.controller.enqueue_remote(remote("A"));
    h.receiver.set_status(ReceiverStatus::playing(1.0));
    h.controller.start(h.receiver.clone());
    advance(1.0).await;

    h.controller.set_volume(1.7);
    advance(0.1).await;
    assert_eq!(*h.receiver.volume.lock(), Some(1.0));

    h.controller.shutdown().await;
}
