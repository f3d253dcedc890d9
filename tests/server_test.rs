//! Stream server tests
//!
//! The server is bound on port 0 and exercised with reqwest. On unix a shell
//! script stands in for ffmpeg: it prints its pid and arguments, then sleeps
//! like a transcoder waiting for input.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use reelcast::models::SubtitleSelection;
use reelcast::stream::{MediaSource, ServerSettings, SharedStreamConfig, StreamServer};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn settings(ffmpeg: &str, dir: &Path) -> ServerSettings {
    ServerSettings {
        ffmpeg_path: ffmpeg.to_string(),
        chunk_size: 64 * 1024,
        kill_grace: Duration::from_millis(200),
        thumbnail_path: dir.join("thumb.jpg"),
    }
}

async fn start(config: SharedStreamConfig, settings: ServerSettings) -> StreamServer {
    StreamServer::bind(SocketAddr::new(LOCALHOST, 0), config, settings)
        .await
        .unwrap()
}

fn media_file(dir: &Path) -> PathBuf {
    let path = dir.join("movie.mkv");
    std::fs::write(&path, b"not really a movie").unwrap();
    path
}

// =============================================================================
// Error Responses
// =============================================================================

#[tokio::test]
async fn test_no_source_is_404() {
    let dir = TempDir::new().unwrap();
    let server = start(
        SharedStreamConfig::default(),
        settings("/nonexistent/ffmpeg", dir.path()),
    )
    .await;

    let resp = reqwest::get(server.stream_url(LOCALHOST)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_local_file_is_404() {
    let dir = TempDir::new().unwrap();
    let config = SharedStreamConfig::default();
    config.begin_item(
        MediaSource::Local(dir.path().join("gone.mkv")),
        SubtitleSelection::None,
    );
    let server = start(config, settings("/nonexistent/ffmpeg", dir.path())).await;

    let resp = reqwest::get(server.stream_url(LOCALHOST)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_transcoder_spawn_failure_is_500() {
    let dir = TempDir::new().unwrap();
    let config = SharedStreamConfig::default();
    config.begin_item(MediaSource::Local(media_file(dir.path())), SubtitleSelection::None);
    let server = start(config, settings("/nonexistent/ffmpeg", dir.path())).await;

    let resp = reqwest::get(server.stream_url(LOCALHOST)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 500);

    server.shutdown().await;
}

// =============================================================================
// Thumbnail
// =============================================================================

#[tokio::test]
async fn test_thumbnail_route() {
    let dir = TempDir::new().unwrap();
    let server = start(
        SharedStreamConfig::default(),
        settings("/nonexistent/ffmpeg", dir.path()),
    )
    .await;

    let resp = reqwest::get(server.thumb_url(LOCALHOST)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    std::fs::write(dir.path().join("thumb.jpg"), b"\xff\xd8\xff\xe0jpeg").unwrap();
    let resp = reqwest::get(server.thumb_url(LOCALHOST)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/jpeg")
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"\xff\xd8\xff\xe0jpeg");

    server.shutdown().await;
}

#[tokio::test]
async fn test_stream_urls_are_unique() {
    let dir = TempDir::new().unwrap();
    let server = start(
        SharedStreamConfig::default(),
        settings("/nonexistent/ffmpeg", dir.path()),
    )
    .await;

    let a = server.stream_url(LOCALHOST);
    let b = server.stream_url(LOCALHOST);
    assert_ne!(a, b);
    let prefix = format!("http://127.0.0.1:{}/stream.mp4?t=", server.local_addr().port());
    assert!(a.starts_with(&prefix), "{}", a);

    server.shutdown().await;
}

// =============================================================================
// Streaming With A Fake Transcoder
// =============================================================================

#[cfg(unix)]
mod fake_transcoder {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_ffmpeg(dir: &Path) -> String {
        let path = dir.join("ffmpeg");
        std::fs::write(
            &path,
            "#!/bin/sh\nprintf 'PID %s ARGS %s\\n' \"$$\" \"$*\"\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Read the response until the script's single line is complete
    async fn first_line(resp: &mut reqwest::Response) -> String {
        let mut text = String::new();
        while !text.contains('\n') {
            match tokio::time::timeout(Duration::from_secs(10), resp.chunk()).await {
                Ok(Ok(Some(chunk))) => text.push_str(&String::from_utf8_lossy(&chunk)),
                Ok(Ok(None)) => panic!("stream ended before a full line: {:?}", text),
                Ok(Err(e)) => panic!("stream failed: {}", e),
                Err(_) => panic!("no output from the transcoder"),
            }
        }
        text
    }

    fn pid_of(line: &str) -> i32 {
        line.split_whitespace()
            .nth(1)
            .and_then(|p| p.parse().ok())
            .unwrap()
    }

    fn alive(pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }

    async fn wait_gone(pid: i32) -> bool {
        for _ in 0..50 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_each_request_uses_current_offset() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = fake_ffmpeg(dir.path());
        let config = SharedStreamConfig::default();
        config.begin_item(MediaSource::Local(media_file(dir.path())), SubtitleSelection::None);
        let server = start(config.clone(), settings(&ffmpeg, dir.path())).await;

        let mut first = reqwest::get(server.stream_url(LOCALHOST)).await.unwrap();
        assert_eq!(first.status().as_u16(), 200);
        assert_eq!(
            first
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("video/mp4")
        );
        let line = first_line(&mut first).await;
        assert!(line.contains("-ss 0 "), "{}", line);
        assert!(line.contains("pipe:1"), "{}", line);
        let first_pid = pid_of(&line);

        // a seek with subtitles on: new offset, old streams cancelled, fresh request
        let srt = dir.path().join("movie.srt");
        std::fs::write(&srt, "1\n00:00:01,000 --> 00:00:02,000\nhi\n").unwrap();
        config.set_subtitle(SubtitleSelection::ExternalFile(srt));
        config.set_seek_offset(50);
        server.cancel_streams();

        let mut second = reqwest::get(server.stream_url(LOCALHOST)).await.unwrap();
        let line = first_line(&mut second).await;
        assert!(line.contains("-ss 50 "), "{}", line);
        assert!(line.contains("setpts=PTS+50/TB"), "{}", line);
        let second_pid = pid_of(&line);
        assert_ne!(first_pid, second_pid);

        assert!(wait_gone(first_pid).await, "first transcoder still running");
        assert!(alive(second_pid));

        drop(first);
        drop(second);
        server.shutdown().await;
        assert!(wait_gone(second_pid).await, "second transcoder still running");
    }
}
