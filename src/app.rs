//! Assembly of the core: documents, prober, transcoder, supervisors,
//! custodian, and the transport-agnostic command surface over them.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::custodian::Custodian;
use crate::dto::{CleanupReport, StorageStats};
use crate::persist::Store;
use crate::recording::manager::validate_rtsp_url;
use crate::recording::supervisor::SupervisorContext;
use crate::recording::{RecordingManager, Registry};
use crate::result::Result;
use crate::settings::{Settings, SettingsPatch};
use crate::streams::StreamService;
use probe::{PoolConfig, ProbeOutcome, ProbePool, Prober};
use transcode::{FfmpegTranscoder, Transcoder};

pub struct App {
    config: Config,
    store: Arc<Store>,
    recordings: RecordingManager,
    streams: StreamService,
    custodian: Arc<Custodian>,
    prober: Arc<dyn Prober>,
    shutdown: CancellationToken,
    custodian_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl App {
    /// The production wiring: pooled prober, real ffmpeg driver.
    pub fn new(config: Config) -> Self {
        let prober = Arc::new(ProbePool::new(PoolConfig {
            heartbeat: config.heartbeat(),
            ..PoolConfig::default()
        }));
        let transcoder = Arc::new(FfmpegTranscoder::new());
        Self::with_collaborators(config, prober, transcoder)
    }

    /// Same assembly with injectable collaborators; the seam the
    /// end-to-end tests use.
    pub fn with_collaborators(
        config: Config,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let store = Arc::new(Store::new(
            config.data.recordings_file.clone(),
            config.data.streams_file.clone(),
            config.data.settings_file.clone(),
        ));
        let registry = Arc::new(Registry::new());
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(SupervisorContext {
            store: store.clone(),
            prober: prober.clone(),
            transcoder,
            overlay: config.settings_overlay(),
            logs_dir: config.data.logs_dir.clone(),
            probe_timeout: config.probe_timeout(),
            completion_tx,
        });

        let custodian = Arc::new(Custodian::new(store.clone()));
        let shutdown = CancellationToken::new();
        let custodian_task = custodian.clone().arm(completion_rx, shutdown.clone());

        Self {
            recordings: RecordingManager::new(store.clone(), registry, ctx),
            streams: StreamService::new(store.clone()),
            custodian,
            prober,
            store,
            config,
            shutdown,
            custodian_task: StdMutex::new(Some(custodian_task)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recordings(&self) -> &RecordingManager {
        &self.recordings
    }

    pub fn streams(&self) -> &StreamService {
        &self.streams
    }

    /// Re-adopt persisted unfinished recordings; call once at daemon start.
    pub async fn recover(&self) {
        self.recordings.recover().await;
    }

    pub async fn probe_stream(&self, url: &str) -> Result<ProbeOutcome> {
        validate_rtsp_url(url)?;
        Ok(self.prober.probe(url, self.config.probe_timeout()).await)
    }

    /// The settings in force, environment overrides applied.
    pub async fn settings(&self) -> Settings {
        self.config
            .settings_overlay()
            .apply(self.store.settings().await)
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let stored = self.store.update_settings(patch).await?;
        Ok(self.config.settings_overlay().apply(stored))
    }

    pub async fn storage_stats(&self) -> StorageStats {
        self.custodian.storage_stats().await
    }

    pub async fn run_cleanup(&self) -> CleanupReport {
        self.custodian.sweep().await
    }

    /// Graceful stop: cancel every supervisor (soft-stopping children),
    /// wait for them, then drop the custodian schedule.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.recordings.shutdown().await;
        self.shutdown.cancel();
        let task = self.custodian_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
