use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recording job as persisted in the recordings document. Runtime state
/// (status, progress, the ignore-probe flag) lives in the supervisor and is
/// joined in at the view layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    pub start_time: DateTime<Utc>,
    /// Planned capture length, seconds.
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Fields this build does not know about ride through rewrites intact.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const CANCELLED_MESSAGE: &str = "cancelled";

impl Recording {
    pub fn new(name: String, rtsp_url: String, start_time: DateTime<Utc>, duration: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            rtsp_url,
            start_time,
            duration,
            success: None,
            output_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            extra: serde_json::Map::new(),
        }
    }

    /// A recording with a decided outcome is immutable except for deletion.
    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        self.success == Some(false) && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }
}

/// A bookmarked source, pure metadata for clients composing recordings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedStream {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SavedStream {
    pub fn new(name: String, rtsp_url: String, description: Option<String>, favorite: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            rtsp_url,
            description,
            favorite,
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }
}

/// Filesystem-safe rendition of a recording name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "recording".to_string()
    } else {
        cleaned
    }
}

/// `<dir>/<name>_<timestamp>_attempt<k>.<ext>`
pub fn attempt_path(
    dir: &Path,
    name: &str,
    started: DateTime<Utc>,
    attempt: usize,
    ext: &str,
) -> PathBuf {
    dir.join(format!(
        "{}_{}_attempt{attempt}.{ext}",
        sanitize_name(name),
        started.format("%Y-%m-%dT%H-%M-%S"),
    ))
}

/// `<dir>/<name>_<id>.<ext>`
pub fn final_path(dir: &Path, name: &str, id: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}_{id}.{ext}", sanitize_name(name)))
}

/// `<logs_dir>/<name>_<id>.log`
pub fn log_path(logs_dir: &Path, name: &str, id: &str) -> PathBuf {
    logs_dir.join(format!("{}_{id}.log", sanitize_name(name)))
}
