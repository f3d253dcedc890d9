//! Transcoder process lifecycle
//!
//! A [`TranscodeProcess`] owns one transcoder child. Dropping it terminates
//! the child: SIGTERM first, then a hard kill once the grace period runs
//! out. The stream server keeps the guard inside the response body, so a
//! receiver disconnect (body dropped) tears the transcoder down.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Guard around a running transcoder
pub struct TranscodeProcess {
    id: u64,
    child: Option<Child>,
    grace: Duration,
}

impl TranscodeProcess {
    /// Spawn `program args...` with stdout piped for streaming
    ///
    /// stderr is drained into the log on a background task so a chatty
    /// transcoder never blocks on a full pipe.
    pub fn spawn(program: &str, args: &[String], grace: Duration) -> Result<(Self, ChildStdout)> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::TranscodeFailed(format!("could not start {}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::TranscodeFailed("stdout not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(id, stderr));
        }

        info!(transcode = id, pid = ?child.id(), "Transcoder started");
        Ok((
            Self {
                id,
                child: Some(child),
                grace,
            },
            stdout,
        ))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS process id, while the child is still owned
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

impl Drop for TranscodeProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(terminate(self.id, child, self.grace));
            }
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }
}

/// Politely stop a child, then kill it if it lingers
async fn terminate(id: u64, mut child: Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        report_exit(id, status);
        return;
    }

    send_sigterm(&child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_)) => debug!(transcode = id, "Transcoder stopped"),
        Ok(Err(e)) => warn!(transcode = id, "Waiting for transcoder failed: {}", e),
        Err(_) => {
            warn!(transcode = id, "Transcoder ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(transcode = id, "Kill failed: {}", e);
            }
        }
    }
}

/// A transcoder that already exited on its own finished or crashed
fn report_exit(id: u64, status: std::process::ExitStatus) {
    if status.success() {
        info!(transcode = id, "Transcoder finished");
    } else {
        warn!(transcode = id, "Transcoder exited with {}", status);
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &Child) {
    // no polite signal available, the grace wait is just a short delay
    let _ = child;
}

async fn drain_stderr(id: u64, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                debug!(target: "reelcast::ffmpeg", transcode = id, "{}", line.trim());
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    async fn wait_dead(pid: u32) -> bool {
        for _ in 0..100 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transcode_error() {
        let result = TranscodeProcess::spawn("/nonexistent/ffmpeg", &[], Duration::from_millis(100));
        assert!(matches!(result, Err(Error::TranscodeFailed(_))));
    }

    #[tokio::test]
    async fn test_stdout_is_streamed() {
        let args = vec!["-c".to_string(), "echo hello".to_string()];
        let (_proc, mut stdout) = TranscodeProcess::spawn("sh", &args, Duration::from_millis(500)).unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_drop_terminates_child() {
        let args = vec!["30".to_string()];
        let (proc, _stdout) = TranscodeProcess::spawn("sleep", &args, Duration::from_millis(500)).unwrap();
        let pid = proc.pid().unwrap();
        assert!(alive(pid));
        drop(proc);
        assert!(wait_dead(pid).await, "transcoder {} still running", pid);
    }

    #[tokio::test]
    async fn test_sigterm_ignoring_child_is_killed() {
        let args = vec!["-c".to_string(), "trap '' TERM; sleep 30 & wait".to_string()];
        let (proc, _stdout) = TranscodeProcess::spawn("sh", &args, Duration::from_millis(200)).unwrap();
        let pid = proc.pid().unwrap();
        // give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(proc);
        assert!(wait_dead(pid).await, "transcoder {} survived the kill", pid);
    }
}
