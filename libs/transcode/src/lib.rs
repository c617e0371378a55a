//! Driving the external media transcoder.
//!
//! The supervisor talks to the transcoder through the [`Transcoder`] trait:
//! [`capture`] spawns one timed recording run and hands back a
//! [`CaptureHandle`] for progress, soft stop, and the exit event; [`stitch`]
//! concatenates attempt segments into the final file. [`FfmpegTranscoder`]
//! is the real implementation; tests substitute fakes.
//!
//! [`capture`]: Transcoder::capture
//! [`stitch`]: Transcoder::stitch

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

pub mod options;
pub mod progress;
pub mod runner;
pub mod stitch;

pub use options::{AudioCodec, Container, HwAccel, TranscodeOptions, Transport, VideoCodec};
pub use progress::{Progress, parse_progress_line};
pub use runner::{FfmpegTranscoder, ffmpeg_available, ffmpeg_version};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn transcoder `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stitch produced no usable output: {0}")]
    StitchFailed(String),
    #[error(
        "stitched file is suspiciously small: {actual} bytes from {expected} bytes of segments"
    )]
    SuspiciousStitch { actual: u64, expected: u64 },
    #[error("snapshot failed: {0}")]
    Snapshot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One capture run to perform.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub url: String,
    pub output: PathBuf,
    /// Per-recording log file; child output is appended verbatim.
    pub log_path: PathBuf,
    pub duration: Duration,
    pub options: TranscodeOptions,
}

/// How one capture run ended.
#[derive(Debug, Clone, Default)]
pub struct CaptureExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Last line seen on the child's error stream, for diagnostics.
    pub last_stderr: Option<String>,
}

impl CaptureExit {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Stitch N attempt segments into one destination file.
#[derive(Debug, Clone)]
pub struct StitchRequest {
    pub segments: Vec<PathBuf>,
    pub dest: PathBuf,
    pub options: TranscodeOptions,
}

/// Live handle to a running capture.
pub struct CaptureHandle {
    progress: watch::Receiver<Option<Progress>>,
    exit: oneshot::Receiver<CaptureExit>,
    stop: CancellationToken,
}

/// Sender side of a [`CaptureHandle`], held by the implementation driving
/// the subprocess (or a fake).
pub struct CaptureFeed {
    pub progress: watch::Sender<Option<Progress>>,
    pub exit: oneshot::Sender<CaptureExit>,
    pub stop: CancellationToken,
}

impl CaptureHandle {
    /// Create a connected handle/feed pair.
    pub fn channel() -> (Self, CaptureFeed) {
        let (progress_tx, progress_rx) = watch::channel(None);
        let (exit_tx, exit_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        (
            Self {
                progress: progress_rx,
                exit: exit_rx,
                stop: stop.clone(),
            },
            CaptureFeed {
                progress: progress_tx,
                exit: exit_tx,
                stop,
            },
        )
    }

    pub fn progress(&self) -> watch::Receiver<Option<Progress>> {
        self.progress.clone()
    }

    /// Request a graceful stop (interrupt, not kill). Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token observed by the driving side; cancelled when a stop was
    /// requested.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Wait for the subprocess to exit. If the driving side vanished, a
    /// synthetic failed exit is returned.
    pub async fn wait(self) -> CaptureExit {
        self.exit.await.unwrap_or(CaptureExit {
            code: None,
            signal: None,
            last_stderr: Some("capture task dropped without reporting an exit".to_string()),
        })
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Spawn one capture run. The returned handle reports progress and the
    /// exit event; dropping it does not stop the run.
    async fn capture(&self, req: CaptureRequest) -> Result<CaptureHandle, TranscodeError>;

    /// Combine segments into `dest`. With one segment this is a rename;
    /// otherwise a concat-demuxer run with stream copy. On success the
    /// segments are deleted; on failure they are left in place.
    async fn stitch(&self, req: StitchRequest) -> Result<(), TranscodeError>;
}
