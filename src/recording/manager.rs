//! Command surface for recordings.
//!
//! Validates external input, owns the supervisor registry, and joins
//! persisted rows with live supervisor state for observers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::dto::{CreateRecording, RecordingStats, RecordingView, UpdateRecording};
use crate::error::AppError;
use crate::model::Recording;
use crate::persist::Store;
use crate::recording::supervisor::{ScheduleChanges, SupervisorContext};
use crate::recording::{RecordingStatus, Registry, Supervisor, persisted_status};
use crate::result::Result;

pub struct RecordingManager {
    store: Arc<Store>,
    registry: Arc<Registry>,
    ctx: Arc<SupervisorContext>,
}

impl RecordingManager {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>, ctx: Arc<SupervisorContext>) -> Self {
        Self {
            store,
            registry,
            ctx,
        }
    }

    /// Re-adopt unfinished recordings after a restart. Rows whose window is
    /// already over are finalized as failed by their own supervisor.
    pub async fn recover(&self) {
        let unfinished: Vec<Recording> = self
            .store
            .recordings()
            .await
            .into_iter()
            .filter(|r| !r.is_finished())
            .collect();
        for rec in unfinished {
            info!("[{}] recovering unfinished recording '{}'", rec.id, rec.name);
            let sup = Supervisor::spawn(&rec, self.ctx.clone());
            if let Err(e) = self.registry.register(&rec.id, sup.clone()) {
                warn!("[{}] not recovered: {e}", rec.id);
                sup.stop();
            }
        }
    }

    pub async fn list(&self) -> Vec<RecordingView> {
        self.store
            .recordings()
            .await
            .into_iter()
            .map(|rec| self.view_of(rec))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<RecordingView> {
        let rec = self.store.recording(id).await?;
        Ok(self.view_of(rec))
    }

    pub async fn create(&self, req: CreateRecording) -> Result<RecordingView> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        validate_rtsp_url(&req.rtsp_url)?;
        let start_time = parse_start_time(&req.start_time)?;
        let duration = match req.duration {
            Some(0) => return Err(AppError::validation("duration must be positive")),
            Some(d) => d,
            None => self.store.settings().await.default_duration,
        };

        let rec = Recording::new(name.to_string(), req.rtsp_url, start_time, duration);
        self.store.insert_recording(rec.clone()).await?;
        let sup = Supervisor::spawn(&rec, self.ctx.clone());
        self.registry.register(&rec.id, sup.clone())?;
        info!(
            "[{}] created '{}' starting {} for {}s",
            rec.id, rec.name, rec.start_time, rec.duration
        );
        Ok(sup.view(rec))
    }

    pub async fn update(&self, id: &str, req: UpdateRecording) -> Result<RecordingView> {
        let rec = self.store.recording(id).await?;
        if rec.is_finished() {
            return Err(AppError::conflict(format!("recording {id} is finished")));
        }
        let sup = self
            .registry
            .lookup(id)
            .ok_or_else(|| AppError::conflict(format!("recording {id} has no supervisor")))?;

        if let Some(name) = &req.name
            && name.trim().is_empty()
        {
            return Err(AppError::validation("name must not be empty"));
        }
        if let Some(url) = &req.rtsp_url {
            validate_rtsp_url(url)?;
        }
        if req.duration == Some(0) {
            return Err(AppError::validation("duration must be positive"));
        }
        let start_time = req.start_time.as_deref().map(parse_start_time).transpose()?;

        let updated = sup
            .update(ScheduleChanges {
                name: req.name.map(|n| n.trim().to_string()),
                rtsp_url: req.rtsp_url,
                start_time,
                duration: req.duration,
            })
            .await?;
        Ok(sup.view(updated))
    }

    /// Cancel (if live) and remove a recording together with its files.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let rec = self.store.recording(id).await?;
        if let Some(sup) = self.registry.remove(id) {
            sup.stop();
            sup.wait_stopped().await;
        }
        // The supervisor may have finalized while we waited; read the row
        // again for the freshest output path.
        let rec = self.store.recording(id).await.unwrap_or(rec);
        self.store.remove_recording(id).await?;

        if let Some(path) = &rec.output_path
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("[{id}] output file not deleted: {e}");
        }
        info!("[{id}] deleted");
        Ok(())
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        let _ = self.store.recording(id).await?;
        let sup = self
            .registry
            .lookup(id)
            .ok_or_else(|| AppError::conflict(format!("recording {id} is not startable")))?;
        sup.start()
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        // Surface NotFound for unknown ids before judging state.
        let _ = self.store.recording(id).await?;
        let sup = self
            .registry
            .lookup(id)
            .ok_or_else(|| AppError::conflict(format!("recording {id} is not running")))?;
        sup.stop();
        Ok(())
    }

    pub async fn set_ignore_probe(&self, id: &str, ignore: bool) -> Result<()> {
        let _ = self.store.recording(id).await?;
        let sup = self
            .registry
            .lookup(id)
            .ok_or_else(|| AppError::conflict(format!("recording {id} is not active")))?;
        sup.set_ignore_probe(ignore);
        Ok(())
    }

    pub async fn stats(&self) -> RecordingStats {
        let mut stats = RecordingStats::default();
        for rec in self.store.recordings().await {
            stats.count(self.status_of(&rec));
        }
        stats
    }

    pub fn status_of(&self, rec: &Recording) -> RecordingStatus {
        match self.registry.lookup(&rec.id) {
            Some(sup) => sup.status(),
            None => persisted_status(rec),
        }
    }

    fn view_of(&self, rec: Recording) -> RecordingView {
        match self.registry.lookup(&rec.id) {
            Some(sup) => sup.view(rec),
            None => RecordingView {
                status: persisted_status(&rec),
                progress: None,
                ignore_live_check: false,
                recording: rec,
            },
        }
    }

    /// Cancel every live supervisor and wait for them; daemon shutdown.
    pub async fn shutdown(&self) {
        let sups = self.registry.all();
        for sup in &sups {
            sup.stop();
        }
        for sup in &sups {
            sup.wait_stopped().await;
        }
    }
}

pub(crate) fn validate_rtsp_url(url: &str) -> Result<()> {
    if !url.starts_with("rtsp://") {
        return Err(AppError::validation("URL must begin with rtsp://"));
    }
    let parsed =
        url::Url::parse(url).map_err(|e| AppError::validation(format!("invalid RTSP URL: {e}")))?;
    // rtsp is a non-special scheme to the URL parser, so "rtsp://" parses
    // fine with no authority; a probeable source needs a host.
    if parsed.host_str().is_none_or(|h| h.is_empty()) {
        return Err(AppError::validation("RTSP URL must name a host"));
    }
    Ok(())
}

pub(crate) fn parse_start_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("invalid start time: {e}")))
}
