//! Request and response shapes of the command surface.

use serde::{Deserialize, Serialize};

use crate::model::{Recording, SavedStream};
use crate::recording::RecordingStatus;
use transcode::Progress;

/// A recording joined with its live supervisor state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingView {
    #[serde(flatten)]
    pub recording: Recording,
    pub status: RecordingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub ignore_live_check: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecording {
    pub name: String,
    pub rtsp_url: String,
    /// RFC 3339 instant.
    pub start_time: String,
    /// Seconds; defaults to the settings document's default duration.
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecording {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub start_time: Option<String>,
    pub duration: Option<u64>,
}

impl UpdateRecording {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.rtsp_url.is_none()
            && self.start_time.is_none()
            && self.duration.is_none()
    }
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub total: usize,
    pub scheduled: usize,
    pub starting: usize,
    pub recording: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RecordingStats {
    pub fn count(&mut self, status: RecordingStatus) {
        self.total += 1;
        match status {
            RecordingStatus::Scheduled => self.scheduled += 1,
            RecordingStatus::Starting => self.starting += 1,
            RecordingStatus::Recording => self.recording += 1,
            RecordingStatus::Retrying => self.retrying += 1,
            RecordingStatus::Completed => self.completed += 1,
            RecordingStatus::Failed => self.failed += 1,
            RecordingStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStream {
    pub name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStream {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub description: Option<String>,
    pub favorite: Option<bool>,
}

/// Marker alias so callers deserialize the stream list uniformly.
pub type StreamView = SavedStream;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub used_gb: f64,
    pub max_gb: f64,
    pub percentage: f64,
    pub auto_delete_days: u32,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_old: usize,
    pub deleted_for_space: usize,
    pub current_storage_gb: f64,
}
