use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::settings::Settings;
use transcode::Container;

/// Process-level configuration: where the documents and directories live and
/// how the daemon behaves. Tunables that belong to the archive itself (codec
/// choices, retention, quotas) live in the persisted settings document
/// instead.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub probe: Probe,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Data {
    #[serde(default = "default_recordings_file")]
    pub recordings_file: PathBuf,
    #[serde(default = "default_streams_file")]
    pub streams_file: PathBuf,
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Probe {
    /// Per-probe deadline in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub heartbeat: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
}

/// Environment overrides for values that otherwise live in the settings
/// document; captured once at config parse and overlaid on every read.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverlay {
    pub output_dir: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub container: Option<Container>,
}

impl SettingsOverlay {
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(dir) = &self.output_dir {
            settings.output_directory = dir.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(container) = self.container {
            settings.container_format = container;
        }
        settings
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_recordings_file() -> PathBuf {
    PathBuf::from("./data/recordings.json")
}

fn default_streams_file() -> PathBuf {
    PathBuf::from("./data/streams.json")
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("./data/settings.json")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_heartbeat_interval() -> u64 {
    60
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Self {
            recordings_file: default_recordings_file(),
            streams_file: default_streams_file(),
            settings_file: default_settings_file(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            heartbeat: false,
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("tapedeck.toml")))
            .or(fs::read_to_string("/etc/tapedeck/tapedeck.toml"))
            .unwrap_or("".to_string());
        let mut cfg: Self = toml::from_str(result.as_str()).expect("config parse error");
        cfg.override_from_env();
        cfg
    }

    /// Environment wins over the config file for the document paths, the
    /// log directory, and the prober heartbeat.
    fn override_from_env(&mut self) {
        if let Ok(v) = env::var("TAPEDECK_RECORDINGS_FILE") {
            self.data.recordings_file = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TAPEDECK_STREAMS_FILE") {
            self.data.streams_file = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TAPEDECK_SETTINGS_FILE") {
            self.data.settings_file = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TAPEDECK_LOG_DIR") {
            self.data.logs_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TAPEDECK_PROBE_HEARTBEAT") {
            self.probe.heartbeat = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = env::var("TAPEDECK_PROBE_HEARTBEAT_INTERVAL")
            && let Ok(secs) = v.parse()
        {
            self.probe.heartbeat_interval = secs;
        }
    }

    /// Environment overrides for settings-document values.
    pub fn settings_overlay(&self) -> SettingsOverlay {
        SettingsOverlay {
            output_dir: env::var("TAPEDECK_OUTPUT_DIR").ok().map(PathBuf::from),
            ffmpeg: env::var("TAPEDECK_FFMPEG").ok().map(PathBuf::from),
            container: env::var("TAPEDECK_CONTAINER")
                .ok()
                .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok()),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.probe
            .heartbeat
            .then(|| Duration::from_secs(self.probe.heartbeat_interval))
    }
}
