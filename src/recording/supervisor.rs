//! The per-recording state machine.
//!
//! One supervisor task owns each recording from its scheduled delay to the
//! terminal persistence write: it waits for the start instant, probes the
//! source for liveness, drives capture attempts through the transcoder,
//! retries within the wall-clock window, stitches whatever made it to disk,
//! and writes the outcome through the store exactly once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SettingsOverlay;
use crate::dto::RecordingView;
use crate::error::AppError;
use crate::model::{self, CANCELLED_MESSAGE, Recording};
use crate::persist::{Durability, Store};
use crate::recording::RecordingStatus;
use crate::result::Result;
use crate::settings::Settings;
use probe::Prober;
use transcode::{CaptureRequest, Progress, StitchRequest, Transcoder};

/// Collaborators shared by every supervisor.
pub struct SupervisorContext {
    pub store: Arc<Store>,
    pub prober: Arc<dyn Prober>,
    pub transcoder: Arc<dyn Transcoder>,
    pub overlay: SettingsOverlay,
    pub logs_dir: PathBuf,
    pub probe_timeout: Duration,
    /// Nudges the custodian after a successful completion.
    pub completion_tx: mpsc::UnboundedSender<()>,
}

/// The mutable schedule; changeable only while the recording is scheduled.
#[derive(Debug, Clone)]
struct Schedule {
    name: String,
    rtsp_url: String,
    start_time: DateTime<Utc>,
    duration: u64,
}

/// Validated schedule changes, applied by [`Supervisor::update`].
#[derive(Debug, Default, Clone)]
pub struct ScheduleChanges {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

enum StartWait {
    Go,
    Cancelled,
}

enum ProbeWait {
    Go,
    Cancelled,
    Exhausted,
    WindowClosed,
}

enum AttemptEnd {
    Exited,
    Cancelled,
}

pub struct Supervisor {
    id: String,
    sched: StdRwLock<Schedule>,
    status: StdRwLock<RecordingStatus>,
    ignore_probe: AtomicBool,
    progress: StdRwLock<Option<Progress>>,
    attempts: StdMutex<Vec<PathBuf>>,
    /// Retry accounting for the whole recording: failed probe ticks and
    /// failed capture runs draw on the same budget.
    attempt_counter: AtomicU32,
    last_error: StdMutex<Option<String>>,
    cancel: CancellationToken,
    /// Wakes the scheduled-start timer and the probe waiter after a
    /// schedule change or flag toggle.
    poke: Notify,
    initial_start: StdMutex<Option<DateTime<Utc>>>,
    ctx: Arc<SupervisorContext>,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Supervisor {
    /// Build the supervisor for a recording and start its task.
    pub fn spawn(recording: &Recording, ctx: Arc<SupervisorContext>) -> Arc<Self> {
        let sup = Arc::new(Self {
            id: recording.id.clone(),
            sched: StdRwLock::new(Schedule {
                name: recording.name.clone(),
                rtsp_url: recording.rtsp_url.clone(),
                start_time: recording.start_time,
                duration: recording.duration,
            }),
            status: StdRwLock::new(RecordingStatus::Scheduled),
            ignore_probe: AtomicBool::new(false),
            progress: StdRwLock::new(None),
            attempts: StdMutex::new(Vec::new()),
            attempt_counter: AtomicU32::new(0),
            last_error: StdMutex::new(None),
            cancel: CancellationToken::new(),
            poke: Notify::new(),
            initial_start: StdMutex::new(None),
            ctx,
            task: StdMutex::new(None),
        });
        let handle = tokio::spawn(Self::run(sup.clone()));
        *sup.task.lock().unwrap() = Some(handle);
        sup
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> RecordingStatus {
        *self.status.read().unwrap()
    }

    pub fn progress(&self) -> Option<Progress> {
        self.progress.read().unwrap().clone()
    }

    pub fn ignores_probe(&self) -> bool {
        self.ignore_probe.load(Ordering::Acquire)
    }

    pub fn attempt_paths(&self) -> Vec<PathBuf> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn view(&self, recording: Recording) -> RecordingView {
        RecordingView {
            status: self.status(),
            progress: self.progress(),
            ignore_live_check: self.ignores_probe(),
            recording,
        }
    }

    /// Begin now instead of at the scheduled instant.
    pub fn start(&self) -> Result<()> {
        if self.status() != RecordingStatus::Scheduled {
            return Err(AppError::conflict(format!(
                "recording {} is {}, not scheduled",
                self.id,
                self.status()
            )));
        }
        self.sched.write().unwrap().start_time = Utc::now();
        self.poke.notify_one();
        Ok(())
    }

    /// Cancel whatever the recording is doing. No-op once terminal.
    pub fn stop(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.cancel.cancel();
    }

    pub fn set_ignore_probe(&self, ignore: bool) {
        self.ignore_probe.store(ignore, Ordering::Release);
        self.poke.notify_one();
    }

    /// Apply schedule changes; only a scheduled recording accepts them.
    pub async fn update(&self, changes: ScheduleChanges) -> Result<Recording> {
        if self.status() != RecordingStatus::Scheduled {
            return Err(AppError::conflict(format!(
                "recording {} has already started",
                self.id
            )));
        }
        {
            let mut sched = self.sched.write().unwrap();
            if let Some(name) = &changes.name {
                sched.name = name.clone();
            }
            if let Some(url) = &changes.rtsp_url {
                sched.rtsp_url = url.clone();
            }
            if let Some(start) = changes.start_time {
                sched.start_time = start;
            }
            if let Some(duration) = changes.duration {
                sched.duration = duration;
            }
        }
        let updated = self
            .ctx
            .store
            .update_recording(&self.id, Durability::Durable, |r| {
                if let Some(name) = changes.name {
                    r.name = name;
                }
                if let Some(url) = changes.rtsp_url {
                    r.rtsp_url = url;
                }
                if let Some(start) = changes.start_time {
                    r.start_time = start;
                }
                if let Some(duration) = changes.duration {
                    r.duration = duration;
                }
                r.updated_at = Utc::now();
            })
            .await?;
        self.poke.notify_one();
        Ok(updated)
    }

    /// Wait for the supervisor task to finish. Used by delete and daemon
    /// shutdown after cancelling.
    pub async fn wait_stopped(&self) {
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let (start_time, duration) = {
            let sched = self.sched.read().unwrap();
            (sched.start_time, sched.duration)
        };
        // A recording whose whole window is already behind us cannot be
        // started; this is the restart-recovery path for stale rows.
        let window_end = start_time + chrono::Duration::seconds(duration as i64);
        if window_end <= Utc::now() {
            warn!("[{}] scheduled window already over", self.id);
            self.finalize(
                RecordingStatus::Failed,
                Some("missed scheduled start".to_string()),
            )
            .await;
            return;
        }

        match self.wait_for_start().await {
            StartWait::Go => {}
            StartWait::Cancelled => {
                self.finalize(RecordingStatus::Cancelled, None).await;
                return;
            }
        }

        self.set_status(RecordingStatus::Starting);
        let started = self.sched.read().unwrap().start_time;
        *self.initial_start.lock().unwrap() = Some(started);
        info!("[{}] starting, window of {}s begins", self.id, duration);

        loop {
            match self.await_live().await {
                ProbeWait::Go => {}
                ProbeWait::Cancelled => {
                    self.finalize(RecordingStatus::Cancelled, None).await;
                    return;
                }
                ProbeWait::Exhausted | ProbeWait::WindowClosed => {
                    self.finalize_exhausted().await;
                    return;
                }
            }

            self.set_status(RecordingStatus::Recording);
            match self.run_attempt().await {
                AttemptEnd::Cancelled => {
                    self.finalize(RecordingStatus::Cancelled, None).await;
                    return;
                }
                AttemptEnd::Exited => {}
            }

            if self.remaining().is_zero() {
                self.finalize(RecordingStatus::Completed, None).await;
                return;
            }

            let settings = self.effective_settings().await;
            let used = self.attempt_counter.fetch_add(1, Ordering::AcqRel) + 1;
            if budget_exhausted(&settings, used) {
                self.finalize_exhausted().await;
                return;
            }

            self.set_status(RecordingStatus::Retrying);
            debug!(
                "[{}] capture dropped with {:?} left, retry {} in {}s",
                self.id,
                self.remaining(),
                used,
                settings.reconnect_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(settings.reconnect_delay)) => {}
                _ = self.cancel.cancelled() => {
                    self.finalize(RecordingStatus::Cancelled, None).await;
                    return;
                }
            }
            self.set_status(RecordingStatus::Starting);
        }
    }

    async fn wait_for_start(&self) -> StartWait {
        loop {
            let target = self.sched.read().unwrap().start_time;
            let delay = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if delay.is_zero() {
                return StartWait::Go;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => return StartWait::Go,
                _ = self.poke.notified() => continue,
                _ = self.cancel.cancelled() => return StartWait::Cancelled,
            }
        }
    }

    /// The probe waiter: poll the source until it is live, the budget or
    /// the window runs out, or we are cancelled.
    async fn await_live(&self) -> ProbeWait {
        loop {
            if self.cancel.is_cancelled() {
                return ProbeWait::Cancelled;
            }
            if self.ignores_probe() {
                debug!("[{}] probe ignored by request", self.id);
                return ProbeWait::Go;
            }
            let url = self.sched.read().unwrap().rtsp_url.clone();
            let outcome = tokio::select! {
                o = self.ctx.prober.probe(&url, self.ctx.probe_timeout) => o,
                _ = self.cancel.cancelled() => return ProbeWait::Cancelled,
            };
            if outcome.is_live() {
                return ProbeWait::Go;
            }

            let settings = self.effective_settings().await;
            let used = self.attempt_counter.fetch_add(1, Ordering::AcqRel) + 1;
            debug!("[{}] probe #{used}: {outcome}", self.id);
            if budget_exhausted(&settings, used) {
                return ProbeWait::Exhausted;
            }
            if self.remaining().is_zero() {
                return ProbeWait::WindowClosed;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(settings.reconnect_delay)) => {}
                _ = self.poke.notified() => {}
                _ = self.cancel.cancelled() => return ProbeWait::Cancelled,
            }
        }
    }

    /// One capture run. The attempt path is recorded before the spawn so a
    /// crash cannot orphan the file out of bookkeeping.
    async fn run_attempt(&self) -> AttemptEnd {
        let settings = self.effective_settings().await;
        let sched = self.sched.read().unwrap().clone();
        let ext = settings.container_format.extension();
        let attempt_no = self.attempts.lock().unwrap().len() + 1;
        let output = model::attempt_path(
            &settings.output_directory,
            &sched.name,
            Utc::now(),
            attempt_no,
            ext,
        );
        self.attempts.lock().unwrap().push(output.clone());

        // Hot-path touch; flushed by the terminal durable write.
        let _ = self
            .ctx
            .store
            .update_recording(&self.id, Durability::CacheOnly, |r| {
                r.updated_at = Utc::now();
            })
            .await;

        let remaining = self.remaining();
        info!(
            "[{}] attempt {attempt_no}: capturing {}s to {}",
            self.id,
            remaining.as_secs(),
            output.display()
        );
        let request = CaptureRequest {
            url: sched.rtsp_url.clone(),
            output,
            log_path: model::log_path(&self.ctx.logs_dir, &sched.name, &self.id),
            duration: remaining,
            options: settings.transcode_options(),
        };
        let handle = match self.ctx.transcoder.capture(request).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[{}] could not spawn transcoder: {e}", self.id);
                *self.last_error.lock().unwrap() = Some(e.to_string());
                return AttemptEnd::Exited;
            }
        };

        let mut progress_rx = handle.progress();
        let mut progress_open = true;
        let stop = handle.stop_token();
        let mut stop_sent = false;
        let mut exit_fut = std::pin::pin!(handle.wait());
        let exit = loop {
            tokio::select! {
                exit = &mut exit_fut => break exit,
                _ = self.cancel.cancelled(), if !stop_sent => {
                    info!("[{}] cancellation requested, stopping capture", self.id);
                    stop.cancel();
                    stop_sent = true;
                }
                changed = progress_rx.changed(), if progress_open => {
                    match changed {
                        Ok(()) => {
                            *self.progress.write().unwrap() = progress_rx.borrow().clone();
                        }
                        Err(_) => progress_open = false,
                    }
                }
            }
        };

        *self.progress.write().unwrap() = None;
        if !exit.clean() {
            let detail = exit
                .last_stderr
                .clone()
                .unwrap_or_else(|| "no transcoder output captured".to_string());
            *self.last_error.lock().unwrap() = Some(format!(
                "transcoder exited with code {:?} signal {:?}: {detail}",
                exit.code, exit.signal
            ));
        }
        if stop_sent {
            AttemptEnd::Cancelled
        } else {
            AttemptEnd::Exited
        }
    }

    /// Terminal decision once the retry budget or the window is gone:
    /// partial data still counts as a completion, nothing on disk is a
    /// failure.
    async fn finalize_exhausted(&self) {
        let used = self.attempt_counter.load(Ordering::Acquire);
        if self.existing_segments().is_empty() {
            let detail = self
                .last_error
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| format!("stream never went live within {used} attempts"));
            self.finalize(RecordingStatus::Failed, Some(detail)).await;
        } else {
            let message = format!("capture is partial: gave up after {used} attempts");
            self.finalize(RecordingStatus::Completed, Some(message))
                .await;
        }
    }

    /// Enter the terminal state: stitch whatever is on disk, then write the
    /// outcome through persistence exactly once.
    async fn finalize(&self, kind: RecordingStatus, error: Option<String>) {
        self.set_status(kind);
        let mut error = match kind {
            RecordingStatus::Cancelled => Some(CANCELLED_MESSAGE.to_string()),
            _ => error,
        };

        let settings = self.effective_settings().await;
        let sched = self.sched.read().unwrap().clone();
        let segments = self.existing_segments();
        let mut output_path = None;
        if !segments.is_empty() {
            let dest = model::final_path(
                &settings.output_directory,
                &sched.name,
                &self.id,
                settings.container_format.extension(),
            );
            match self
                .ctx
                .transcoder
                .stitch(StitchRequest {
                    segments,
                    dest: dest.clone(),
                    options: settings.transcode_options(),
                })
                .await
            {
                Ok(()) => output_path = Some(dest),
                Err(e) => {
                    warn!("[{}] stitch failed: {e}", self.id);
                    let msg = format!("stitch failed: {e}");
                    error = Some(match error {
                        Some(prev) => format!("{prev}; {msg}"),
                        None => msg,
                    });
                    // Left pointing at the final path so callers can see
                    // the inconsistency.
                    output_path = Some(dest);
                }
            }
        }

        let success = kind == RecordingStatus::Completed;
        let now = Utc::now();
        let written = self
            .ctx
            .store
            .update_recording(&self.id, Durability::Durable, |r| {
                r.success = Some(success);
                r.output_path = output_path.clone();
                r.completed_at = Some(now);
                r.updated_at = now;
                r.error_message = error.clone();
            })
            .await;
        if let Err(e) = written {
            warn!("[{}] outcome not persisted: {e}", self.id);
        }
        if success {
            let _ = self.ctx.completion_tx.send(());
        }
        info!("[{}] finished: {kind}", self.id);
    }

    fn set_status(&self, status: RecordingStatus) {
        *self.status.write().unwrap() = status;
    }

    /// Wall-clock budget left: `max(0, duration − (now − initialStart))`.
    fn remaining(&self) -> Duration {
        let initial = self
            .initial_start
            .lock()
            .unwrap()
            .unwrap_or_else(Utc::now);
        let duration = self.sched.read().unwrap().duration;
        let elapsed = (Utc::now() - initial).to_std().unwrap_or(Duration::ZERO);
        Duration::from_secs(duration).saturating_sub(elapsed)
    }

    fn existing_segments(&self) -> Vec<PathBuf> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_file())
            .cloned()
            .collect()
    }

    async fn effective_settings(&self) -> Settings {
        self.ctx.overlay.apply(self.ctx.store.settings().await)
    }
}

fn budget_exhausted(settings: &Settings, used: u32) -> bool {
    if settings.retries_unlimited() {
        return false;
    }
    used >= settings.reconnect_attempts.max(0) as u32
}
