//! Joining attempt segments into the final recording.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::{StitchRequest, TranscodeError};

/// Minimum acceptable final size, as a fraction of the summed segment sizes.
/// A concat that lost more than this is reported as suspicious.
const MIN_SIZE_RATIO: f64 = 0.9;

pub async fn stitch(req: StitchRequest) -> Result<(), TranscodeError> {
    let existing: Vec<&PathBuf> = req
        .segments
        .iter()
        .filter(|p| p.is_file())
        .collect();
    if existing.is_empty() {
        return Err(TranscodeError::StitchFailed(
            "no segment files on disk".to_string(),
        ));
    }

    if existing.len() == 1 {
        std::fs::rename(existing[0], &req.dest)?;
        info!("single segment renamed to {}", req.dest.display());
        return Ok(());
    }

    let expected: u64 = existing
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let list_path = list_file_path(&req.dest);
    std::fs::write(&list_path, list_file_contents(&existing))?;

    let args = req.options.concat_args(&list_path, &req.dest);
    let status = Command::new(&req.options.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| TranscodeError::Spawn {
            binary: req.options.ffmpeg.display().to_string(),
            source: e,
        });
    let _ = std::fs::remove_file(&list_path);
    let status = status?;

    if !status.success() {
        return Err(TranscodeError::StitchFailed(format!(
            "concat run exited with {status}"
        )));
    }

    let actual = std::fs::metadata(&req.dest).map(|m| m.len()).unwrap_or(0);
    if (actual as f64) < (expected as f64) * MIN_SIZE_RATIO {
        warn!(
            "stitch of {} segments looks truncated: {actual} of {expected} bytes",
            existing.len()
        );
        return Err(TranscodeError::SuspiciousStitch { actual, expected });
    }

    for seg in existing {
        if let Err(e) = std::fs::remove_file(seg) {
            warn!("could not remove segment {}: {e}", seg.display());
        }
    }
    info!(
        "stitched {} segments into {} ({actual} bytes)",
        req.segments.len(),
        req.dest.display()
    );
    Ok(())
}

/// The list file sits next to the segments so their basenames resolve.
fn list_file_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stitch".to_string());
    name.push_str(".segments.txt");
    dest.with_file_name(name)
}

/// Concat-demuxer list entries reference segments by basename, single
/// quotes escaped the ffmpeg way.
fn list_file_contents(segments: &[&PathBuf]) -> String {
    let mut out = String::new();
    for seg in segments {
        let base = seg
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(&format!("file '{}'\n", base.replace('\'', r"'\''")));
    }
    out
}
