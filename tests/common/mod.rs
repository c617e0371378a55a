//! Fake collaborators and an app harness for the end-to-end tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use probe::{ProbeOutcome, Prober};
use tapedeck::app::App;
use tapedeck::config::Config;
use tapedeck::recording::RecordingStatus;
use tapedeck::settings::SettingsPatch;
use transcode::{
    CaptureHandle, CaptureRequest, StitchRequest, TranscodeError, Transcoder,
};

/// Prober that replays a script, then repeats its last entry forever.
pub struct FakeProber {
    script: StdMutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn always(outcome: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(VecDeque::new()),
            fallback: outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn sequence(outcomes: &[ProbeOutcome], fallback: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(outcomes.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// What one fake capture run should do.
#[derive(Debug, Clone, Copy)]
pub struct FakeRun {
    pub exit_code: i32,
    /// None = run for the requested duration; Some(s) = die after s seconds.
    pub run_secs: Option<u64>,
    /// Bytes written to the attempt file at spawn.
    pub bytes: usize,
}

impl FakeRun {
    pub fn full(bytes: usize) -> Self {
        Self {
            exit_code: 0,
            run_secs: None,
            bytes,
        }
    }

    pub fn dies_after(secs: u64, bytes: usize) -> Self {
        Self {
            exit_code: 1,
            run_secs: Some(secs),
            bytes,
        }
    }
}

/// Transcoder whose runs follow a script (then a default), and whose stitch
/// concatenates bytes the way the real concat-with-copy would.
pub struct FakeTranscoder {
    script: StdMutex<VecDeque<FakeRun>>,
    default_run: FakeRun,
    captures: AtomicUsize,
    pub fail_stitch: std::sync::atomic::AtomicBool,
}

impl FakeTranscoder {
    pub fn with_default(default_run: FakeRun) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(VecDeque::new()),
            default_run,
            captures: AtomicUsize::new(0),
            fail_stitch: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn scripted(runs: &[FakeRun], default_run: FakeRun) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(runs.iter().copied().collect()),
            default_run,
            captures: AtomicUsize::new(0),
            fail_stitch: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn capture(&self, req: CaptureRequest) -> Result<CaptureHandle, TranscodeError> {
        self.captures.fetch_add(1, Ordering::AcqRel);
        let run = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_run);

        if let Some(parent) = req.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&req.output, vec![0xAB; run.bytes])?;

        let (handle, feed) = CaptureHandle::channel();
        let run_for = run.run_secs.map(Duration::from_secs).unwrap_or(req.duration);
        tokio::spawn(async move {
            let exit = tokio::select! {
                _ = tokio::time::sleep(run_for) => transcode::CaptureExit {
                    code: Some(run.exit_code),
                    signal: None,
                    last_stderr: (run.exit_code != 0)
                        .then(|| "Connection reset by peer".to_string()),
                },
                _ = feed.stop.cancelled() => transcode::CaptureExit {
                    code: None,
                    signal: Some(2),
                    last_stderr: None,
                },
            };
            let _ = feed.exit.send(exit);
        });
        Ok(handle)
    }

    async fn stitch(&self, req: StitchRequest) -> Result<(), TranscodeError> {
        if self.fail_stitch.load(Ordering::Acquire) {
            return Err(TranscodeError::StitchFailed("scripted failure".into()));
        }
        let existing: Vec<_> = req.segments.iter().filter(|p| p.is_file()).collect();
        if existing.is_empty() {
            return Err(TranscodeError::StitchFailed("no segments".into()));
        }
        if existing.len() == 1 {
            std::fs::rename(existing[0], &req.dest)?;
            return Ok(());
        }
        let mut joined = Vec::new();
        for seg in &existing {
            joined.extend(std::fs::read(seg)?);
        }
        std::fs::write(&req.dest, joined)?;
        for seg in existing {
            std::fs::remove_file(seg)?;
        }
        Ok(())
    }
}

pub struct Harness {
    pub app: App,
    pub dir: TempDir,
}

impl Harness {
    pub fn out_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("recordings")
    }
}

/// Build an app over a temp directory with fast test settings applied.
pub async fn harness(
    prober: Arc<FakeProber>,
    transcoder: Arc<FakeTranscoder>,
    patch: SettingsPatch,
) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.data.recordings_file = dir.path().join("data/recordings.json");
    config.data.streams_file = dir.path().join("data/streams.json");
    config.data.settings_file = dir.path().join("data/settings.json");
    config.data.logs_dir = dir.path().join("logs");
    config.probe.timeout_ms = 200;

    let app = App::with_collaborators(config, prober, transcoder);
    let mut patch = patch;
    if patch.output_directory.is_none() {
        patch.output_directory = Some(dir.path().join("recordings"));
    }
    if patch.reconnect_delay.is_none() {
        patch.reconnect_delay = Some(1);
    }
    app.update_settings(patch).await.expect("settings");
    Harness { app, dir }
}

/// Poll until the recording reaches `status` or the deadline passes.
pub async fn wait_for_status(
    app: &App,
    id: &str,
    status: RecordingStatus,
    deadline: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if let Ok(view) = app.recordings().get(id).await
            && view.status == status
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll until the recording is in a terminal status with its outcome
/// persisted.
pub async fn wait_terminal(app: &App, id: &str, deadline: Duration) -> Option<RecordingStatus> {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if let Ok(view) = app.recordings().get(id).await
            && view.status.is_terminal()
            && view.recording.success.is_some()
        {
            return Some(view.status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// RFC 3339 instant `secs` seconds from now.
pub fn in_secs(secs: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(secs)).to_rfc3339()
}
