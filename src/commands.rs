//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the library.
//! Each handler takes CLI args and Output, returns ExitCode.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cli::{
    Control, DevicesCmd, EncoderCmd, ExitCode, Output, PlayCmd, PlaybackEvent, ProbeCmd,
    ProbeReport, ServeCmd, ServeInfo, SubtitleChoice, CONTROL_HELP,
};
use crate::config::Config;
use crate::engine::{EngineOptions, PlaybackController, PlaybackObserver, RunOutcome};
use crate::models::SubtitleSelection;
use crate::receiver::{CattReceiver, Receiver};
use crate::stream::server::is_servable;
use crate::stream::{advertise_host, MediaSource, ServerSettings, SharedStreamConfig, StreamConfig, StreamServer};
use crate::transcode::detect_encoder;
use crate::transcode::probe::{discover_subtitle_options, probe_duration, render_thumbnail};

// =============================================================================
// Observer
// =============================================================================

/// Prints engine events through [`Output`] and remembers the position
pub struct CliObserver {
    output: Output,
    elapsed: Mutex<f64>,
}

impl CliObserver {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            elapsed: Mutex::new(0.0),
        }
    }

    /// Last reported timeline position
    pub fn elapsed(&self) -> f64 {
        *self.elapsed.lock()
    }
}

impl PlaybackObserver for CliObserver {
    fn on_status_text(&self, text: &str) {
        self.output.event(&PlaybackEvent::Status {
            text: text.to_string(),
        });
    }

    fn on_elapsed(&self, seconds: f64) {
        *self.elapsed.lock() = seconds;
        self.output.event(&PlaybackEvent::Elapsed { seconds });
    }

    fn on_duration(&self, seconds: f64) {
        self.output.event(&PlaybackEvent::Duration { seconds });
    }

    fn on_queue_changed(&self, titles: &[String]) {
        self.output.event(&PlaybackEvent::Queue {
            titles: titles.to_vec(),
        });
    }

    fn on_subtitle_options_changed(&self, labels: &[String]) {
        if !labels.is_empty() {
            self.output.event(&PlaybackEvent::Subtitles {
                options: labels.to_vec(),
            });
        }
    }
}

// =============================================================================
// Play Command
// =============================================================================

pub async fn play_cmd(
    cmd: PlayCmd,
    config: &Config,
    device: Option<&str>,
    output: &Output,
) -> ExitCode {
    if cmd.is_empty() {
        return output.error("Nothing to play: pass files or --url", ExitCode::InvalidArgs);
    }
    if let Some(missing) = cmd.files.iter().find(|f| !is_servable(f)) {
        return output.error(
            format!("Source unavailable: {}", missing.display()),
            ExitCode::SourceUnavailable,
        );
    }

    let mut stream_config = StreamConfig::from_config(config);
    if let Some(aspect) = cmd.aspect {
        stream_config.aspect = aspect;
    }
    if let Some(resolution) = cmd.effective_resolution() {
        stream_config.resolution = resolution;
    }

    let observer = Arc::new(CliObserver::new(*output));
    let controller = PlaybackController::with_options(
        EngineOptions::from_config(config),
        stream_config,
        observer.clone(),
    );

    let encoder = controller.detect_encoder().await;
    output.info(format!("Encoder: {}", encoder.name));

    for file in &cmd.files {
        controller.enqueue_local(file.clone());
    }
    for remote in cmd.remote_items() {
        controller.enqueue_remote(remote);
    }

    let device = device
        .map(str::to_string)
        .or_else(|| config.default_device.clone());
    let receiver = Arc::new(CattReceiver::with_path(config.catt_path.clone(), device));
    controller.start(receiver.clone());
    if let Some(subtitle) = cmd.subtitle {
        controller.select_subtitle(SubtitleSelection::ExternalFile(subtitle));
    }
    output.info(CONTROL_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let code = loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Control::parse(&line) {
                        Ok(control) => {
                            apply_control(control, &controller, receiver.as_ref(), &observer, output)
                                .await
                        }
                        Err(e) => output.info(e),
                    }
                }
                Ok(None) | Err(_) => {
                    debug!("stdin closed, playing until the queue ends");
                    stdin_open = false;
                }
            },
            outcome = controller.wait_idle() => break outcome_code(&outcome, output),
            _ = tokio::signal::ctrl_c() => {
                output.info("Interrupted");
                break ExitCode::Success;
            }
        }
    };

    controller.shutdown().await;
    code
}

/// Exit code for how the playback run ended
fn outcome_code(outcome: &RunOutcome, output: &Output) -> ExitCode {
    match outcome {
        RunOutcome::Finished | RunOutcome::Stopped => ExitCode::Success,
        RunOutcome::ReceiverUnavailable(reason) => output.error(
            format!("Receiver not ready: {}", reason),
            ExitCode::CastFailed,
        ),
        RunOutcome::Failed(reason) => {
            output.error(format!("Playback failed: {}", reason), ExitCode::CastFailed)
        }
    }
}

async fn apply_control(
    control: Control,
    controller: &PlaybackController,
    receiver: &dyn Receiver,
    observer: &CliObserver,
    output: &Output,
) {
    match control {
        Control::Seek(position) => {
            if let Some(target) = position.resolve(observer.elapsed()) {
                controller.seek(target);
            }
        }
        Control::Skip => controller.skip(),
        Control::Stop => controller.stop(),
        Control::Volume(level) => {
            let current = receiver
                .status()
                .await
                .ok()
                .and_then(|s| s.volume)
                .map(|v| (v * 100.0).round().clamp(0.0, 100.0) as u8)
                .unwrap_or(100);
            if let Some(percent) = level.resolve(current) {
                controller.set_volume(percent as f32 / 100.0);
            }
        }
        Control::Subtitle(SubtitleChoice::Option(index)) => {
            match controller.subtitle_options().get(index) {
                Some(option) => controller.select_subtitle(option.selection.clone()),
                None => output.info(format!("No subtitle option {}", index)),
            }
        }
        Control::Subtitle(SubtitleChoice::Selection(selection)) => {
            controller.select_subtitle(selection)
        }
        Control::Aspect(aspect) => {
            let resolution = crate::models::Resolution::for_aspect(aspect);
            controller.set_aspect(aspect);
            controller.set_resolution(resolution.width, resolution.height);
        }
        Control::Resolution(resolution) => {
            controller.set_resolution(resolution.width, resolution.height)
        }
        Control::Queue => output.event(&PlaybackEvent::Queue {
            titles: controller.queue_titles(),
        }),
        Control::Clear => controller.clear_queue(),
        Control::Help => output.info(CONTROL_HELP),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

pub async fn serve_cmd(cmd: ServeCmd, config: &Config, output: &Output) -> ExitCode {
    if !is_servable(&cmd.file) {
        return output.error(
            format!("Source unavailable: {}", cmd.file.display()),
            ExitCode::SourceUnavailable,
        );
    }

    let mut stream_config = StreamConfig::from_config(config);
    stream_config.encoder = detect_encoder(&config.ffmpeg_path).await;
    stream_config.source = Some(MediaSource::Local(cmd.file.clone()));
    stream_config.seek_offset = cmd.seek;
    if let Some(subtitle) = cmd.subtitle {
        stream_config.subtitle = SubtitleSelection::ExternalFile(subtitle);
    }

    let addr = SocketAddr::new(config.bind_address, cmd.port.unwrap_or(config.port));
    let server = match StreamServer::bind(
        addr,
        SharedStreamConfig::new(stream_config),
        ServerSettings::from_config(config),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => return output.error(format!("Could not start server: {}", e), ExitCode::Error),
    };

    if let Err(e) = render_thumbnail(&config.ffmpeg_path, &cmd.file, &config.thumbnail_path()).await {
        debug!("No thumbnail: {}", e);
    }

    let host = advertise_host(config);
    let info = ServeInfo {
        stream_url: server.stream_url(host),
        thumb_url: server.thumb_url(host),
        seek: cmd.seek,
    };
    if let Err(e) = output.print(&info) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    output.info("Serving until Ctrl-C");

    let _ = tokio::signal::ctrl_c().await;
    server.shutdown().await;
    ExitCode::Success
}

// =============================================================================
// Encoder / Probe / Devices Commands
// =============================================================================

pub async fn encoder_cmd(_cmd: EncoderCmd, config: &Config, output: &Output) -> ExitCode {
    output.info("Testing video encoders...");
    let choice = detect_encoder(&config.ffmpeg_path).await;
    if let Err(e) = output.print(&choice) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

pub async fn probe_cmd(cmd: ProbeCmd, config: &Config, output: &Output) -> ExitCode {
    if !is_servable(&cmd.file) {
        return output.error(
            format!("Source unavailable: {}", cmd.file.display()),
            ExitCode::SourceUnavailable,
        );
    }

    let duration = match probe_duration(&config.ffprobe_path, &cmd.file.to_string_lossy()).await {
        Ok(duration) => Some(duration),
        Err(e) => {
            output.info(format!("Duration unknown: {}", e));
            None
        }
    };
    let subtitles = discover_subtitle_options(&config.ffprobe_path, &cmd.file)
        .await
        .into_iter()
        .map(|option| option.label)
        .collect();

    let report = ProbeReport {
        path: cmd.file,
        duration,
        subtitles,
    };
    if let Err(e) = output.print(&report) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

pub async fn devices_cmd(_cmd: DevicesCmd, config: &Config, output: &Output) -> ExitCode {
    output.info("Scanning for Chromecast devices...");

    match CattReceiver::with_path(config.catt_path.clone(), None).scan().await {
        Ok(devices) if devices.is_empty() => {
            output.error("No Chromecast devices found", ExitCode::DeviceNotFound)
        }
        Ok(devices) => {
            if let Err(e) = output.print(&devices) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.error(format!("Device scan failed: {}", e), ExitCode::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_output() -> Output {
        Output {
            json: false,
            quiet: true,
        }
    }

    #[test]
    fn test_observer_tracks_elapsed() {
        let observer = CliObserver::new(quiet_output());
        assert_eq!(observer.elapsed(), 0.0);
        observer.on_elapsed(125.2);
        assert!((observer.elapsed() - 125.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_play_without_media_is_invalid() {
        let cmd = PlayCmd {
            files: Vec::new(),
            urls: Vec::new(),
            titles: Vec::new(),
            durations: Vec::new(),
            headers: Vec::new(),
            subtitle: None,
            aspect: None,
            resolution: None,
        };
        let code = play_cmd(cmd, &Config::default(), None, &quiet_output()).await;
        assert_eq!(code, ExitCode::InvalidArgs);
    }

    #[test]
    fn test_failed_runs_exit_with_cast_failed() {
        let output = quiet_output();
        assert_eq!(outcome_code(&RunOutcome::Finished, &output), ExitCode::Success);
        assert_eq!(outcome_code(&RunOutcome::Stopped, &output), ExitCode::Success);
        assert_eq!(
            outcome_code(
                &RunOutcome::ReceiverUnavailable("catt not found".to_string()),
                &output
            ),
            ExitCode::CastFailed
        );
        assert_eq!(
            outcome_code(&RunOutcome::Failed("bind failed".to_string()), &output),
            ExitCode::CastFailed
        );
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let cmd = ProbeCmd {
            file: "/nonexistent/movie.mkv".into(),
        };
        let code = probe_cmd(cmd, &Config::default(), &quiet_output()).await;
        assert_eq!(code, ExitCode::SourceUnavailable);
    }
}
