//! Recording lifecycle: the registry of live supervisors, the per-job state
//! machine, and the command surface over both.

use serde::Serialize;

use crate::model::Recording;

pub mod manager;
pub mod registry;
pub mod supervisor;

pub use manager::RecordingManager;
pub use registry::Registry;
pub use supervisor::Supervisor;

/// Derived runtime status. `Completed`, `Failed`, and `Cancelled` are
/// terminal; the rest describe a live supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Scheduled,
    Starting,
    Recording,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingStatus::Completed | RecordingStatus::Failed | RecordingStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingStatus::Scheduled => "scheduled",
            RecordingStatus::Starting => "starting",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Retrying => "retrying",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a recording that has no live supervisor, from its persisted
/// fields alone.
pub fn persisted_status(recording: &Recording) -> RecordingStatus {
    match recording.success {
        Some(true) => RecordingStatus::Completed,
        Some(false) if recording.was_cancelled() => RecordingStatus::Cancelled,
        Some(false) => RecordingStatus::Failed,
        None => RecordingStatus::Scheduled,
    }
}
