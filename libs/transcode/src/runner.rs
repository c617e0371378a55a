//! The real ffmpeg driver.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::progress::parse_progress_line;
use crate::{
    CaptureExit, CaptureFeed, CaptureHandle, CaptureRequest, StitchRequest, TranscodeError,
    Transcoder, TranscodeOptions, stitch,
};

/// Grace period between the soft-stop signal and a hard kill.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Snapshot children are killed after this long.
const SNAPSHOT_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }

    /// Grab a single frame from `url` into `out`, killing the child if it
    /// has not finished within the deadline.
    pub async fn snapshot(
        &self,
        options: &TranscodeOptions,
        url: &str,
        out: &Path,
    ) -> Result<(), TranscodeError> {
        let mut child = Command::new(&options.ffmpeg)
            .args(options.snapshot_args(url, out))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                binary: options.ffmpeg.display().to_string(),
                source: e,
            })?;
        match tokio::time::timeout(SNAPSHOT_DEADLINE, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(TranscodeError::Snapshot(format!(
                "transcoder exited with {status}"
            ))),
            Ok(Err(e)) => Err(TranscodeError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(TranscodeError::Snapshot("snapshot timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn capture(&self, req: CaptureRequest) -> Result<CaptureHandle, TranscodeError> {
        if let Some(parent) = req.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = req.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let args = req
            .options
            .capture_args(&req.url, &req.output, req.duration.as_secs());
        debug!("spawning {} {}", req.options.ffmpeg.display(), args.join(" "));

        let mut child = Command::new(&req.options.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                binary: req.options.ffmpeg.display().to_string(),
                source: e,
            })?;

        let (handle, feed) = CaptureHandle::channel();
        let last_stderr = Arc::new(Mutex::new(None));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|s| {
            tokio::spawn(scan_stream(
                s,
                req.log_path.clone(),
                feed.progress.clone(),
                None,
            ))
        });
        let err_task = stderr.map(|s| {
            tokio::spawn(scan_stream(
                s,
                req.log_path.clone(),
                feed.progress.clone(),
                Some(last_stderr.clone()),
            ))
        });

        tokio::spawn(async move {
            let exit = supervise(child, &feed, last_stderr).await;
            if let Some(t) = out_task {
                let _ = t.await;
            }
            if let Some(t) = err_task {
                let _ = t.await;
            }
            let _ = feed.exit.send(exit);
        });

        Ok(handle)
    }

    async fn stitch(&self, req: StitchRequest) -> Result<(), TranscodeError> {
        stitch::stitch(req).await
    }
}

/// Wait for the child, turning a stop request into a soft interrupt and
/// escalating to kill after the grace period.
async fn supervise(
    mut child: Child,
    feed: &CaptureFeed,
    last_stderr: Arc<Mutex<Option<String>>>,
) -> CaptureExit {
    enum First {
        Exited(std::io::Result<std::process::ExitStatus>),
        StopRequested,
    }

    let first = tokio::select! {
        status = child.wait() => First::Exited(status),
        _ = feed.stop.cancelled() => First::StopRequested,
    };
    let status = match first {
        First::Exited(status) => status,
        First::StopRequested => {
            interrupt(&mut child);
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("transcoder ignored the interrupt, killing");
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    let last = last_stderr.lock().unwrap().clone();
    match status {
        Ok(status) => {
            info!("transcoder exited with {status}");
            CaptureExit {
                code: status.code(),
                signal: exit_signal(&status),
                last_stderr: last,
            }
        }
        Err(e) => CaptureExit {
            code: None,
            signal: None,
            last_stderr: Some(format!("wait failed: {e}")),
        },
    }
}

/// Send the platform's graceful interrupt to the child.
fn interrupt(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        return;
    }
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Append a child stream to the log file line by line, feeding any progress
/// line into the watch channel and remembering the stream's last line when
/// asked to.
async fn scan_stream<R>(
    stream: R,
    log_path: std::path::PathBuf,
    progress: tokio::sync::watch::Sender<Option<crate::Progress>>,
    remember_last: Option<Arc<Mutex<Option<String>>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut log = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => Some(f),
        Err(e) => {
            warn!("cannot open log file {}: {e}", log_path.display());
            None
        }
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(f) = log.as_mut() {
            use std::io::Write;
            let _ = writeln!(f, "{line}");
        }
        if let Some(p) = parse_progress_line(&line) {
            let _ = progress.send(Some(p));
        }
        if let Some(last) = &remember_last
            && !line.trim().is_empty()
        {
            *last.lock().unwrap() = Some(line);
        }
    }
}

/// Whether the transcoder binary responds to `-version`.
pub async fn ffmpeg_available(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// First line of the transcoder's `-version` output.
pub async fn ffmpeg_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("-version").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next().map(|s| s.to_string())
}
