use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::Result;
use transcode::{AudioCodec, Container, HwAccel, TranscodeOptions, Transport, VideoCodec};

/// The persisted settings document. Every field has a default, so a partial
/// or missing document deserializes to defaults merged with whatever was
/// stored — merging twice changes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub ffmpeg_path: PathBuf,
    pub hardware_acceleration: HwAccel,
    pub container_format: Container,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub rtsp_transport: Transport,
    /// Default capture length for new recordings, seconds.
    pub default_duration: u64,
    /// −1 = retry forever, 0 = never retry.
    pub reconnect_attempts: i32,
    /// Seconds between retries and between liveness probes while waiting.
    pub reconnect_delay: u64,
    pub output_directory: PathBuf,
    /// Soft disk cap in GB; 0 = unlimited.
    pub max_storage_gb: f64,
    /// Days to keep completed recordings; 0 = keep forever.
    pub auto_delete_after_days: u32,
    pub preview_enabled: bool,
    pub preview_quality: String,
    /// Seconds between preview refreshes.
    pub preview_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            hardware_acceleration: HwAccel::None,
            container_format: Container::Mp4,
            video_codec: VideoCodec::Copy,
            audio_codec: AudioCodec::Copy,
            rtsp_transport: Transport::Tcp,
            default_duration: 3600,
            reconnect_attempts: 5,
            reconnect_delay: 5,
            output_directory: PathBuf::from("./recordings"),
            max_storage_gb: 0.0,
            auto_delete_after_days: 0,
            preview_enabled: false,
            preview_quality: "medium".to_string(),
            preview_interval: 10,
        }
    }
}

/// Partial update accepted by the command surface; absent fields keep their
/// current value.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub ffmpeg_path: Option<PathBuf>,
    pub hardware_acceleration: Option<HwAccel>,
    pub container_format: Option<Container>,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    pub rtsp_transport: Option<Transport>,
    pub default_duration: Option<u64>,
    pub reconnect_attempts: Option<i32>,
    pub reconnect_delay: Option<u64>,
    pub output_directory: Option<PathBuf>,
    pub max_storage_gb: Option<f64>,
    pub auto_delete_after_days: Option<u32>,
    pub preview_enabled: Option<bool>,
    pub preview_quality: Option<String>,
    pub preview_interval: Option<u64>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(d) = self.default_duration
            && d == 0
        {
            return Err(AppError::validation("defaultDuration must be positive"));
        }
        if let Some(d) = self.reconnect_delay
            && d < 1
        {
            return Err(AppError::validation("reconnectDelay must be at least 1"));
        }
        if let Some(a) = self.reconnect_attempts
            && a < -1
        {
            return Err(AppError::validation(
                "reconnectAttempts must be -1, 0, or positive",
            ));
        }
        if let Some(g) = self.max_storage_gb
            && g < 0.0
        {
            return Err(AppError::validation("maxStorageGb must not be negative"));
        }
        Ok(())
    }
}

impl Settings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.ffmpeg_path {
            self.ffmpeg_path = v;
        }
        if let Some(v) = patch.hardware_acceleration {
            self.hardware_acceleration = v;
        }
        if let Some(v) = patch.container_format {
            self.container_format = v;
        }
        if let Some(v) = patch.video_codec {
            self.video_codec = v;
        }
        if let Some(v) = patch.audio_codec {
            self.audio_codec = v;
        }
        if let Some(v) = patch.rtsp_transport {
            self.rtsp_transport = v;
        }
        if let Some(v) = patch.default_duration {
            self.default_duration = v;
        }
        if let Some(v) = patch.reconnect_attempts {
            self.reconnect_attempts = v;
        }
        if let Some(v) = patch.reconnect_delay {
            self.reconnect_delay = v;
        }
        if let Some(v) = patch.output_directory {
            self.output_directory = v;
        }
        if let Some(v) = patch.max_storage_gb {
            self.max_storage_gb = v;
        }
        if let Some(v) = patch.auto_delete_after_days {
            self.auto_delete_after_days = v;
        }
        if let Some(v) = patch.preview_enabled {
            self.preview_enabled = v;
        }
        if let Some(v) = patch.preview_quality {
            self.preview_quality = v;
        }
        if let Some(v) = patch.preview_interval {
            self.preview_interval = v;
        }
    }

    /// The transcoder option set currently in force.
    pub fn transcode_options(&self) -> TranscodeOptions {
        TranscodeOptions {
            ffmpeg: self.ffmpeg_path.clone(),
            hwaccel: self.hardware_acceleration,
            container: self.container_format,
            video: self.video_codec,
            audio: self.audio_codec,
            transport: self.rtsp_transport,
        }
    }

    pub fn retries_unlimited(&self) -> bool {
        self.reconnect_attempts == -1
    }
}
