//! Parsing of ffmpeg's stderr progress chatter.
//!
//! A progress line looks like:
//! `frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.12 bitrate=1638.4kbits/s speed=1.02x`
//! The four captures are the specification of the record; everything else on
//! the stream is ignored.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub frame: u64,
    pub fps: f64,
    /// Capture position as reported, `HH:MM:SS[.ms]`.
    pub time: String,
    pub bitrate_kbits: f64,
    pub speed: f64,
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"frame=\s*(\d+)\s.*?fps=\s*([\d.]+)\s.*?time=\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)\s.*?bitrate=\s*([\d.]+)\s*kbits/s.*?speed=\s*([\d.]+)x",
        )
        .expect("progress regex")
    })
}

/// Extract a progress record from one line of transcoder output, if the
/// line carries one.
pub fn parse_progress_line(line: &str) -> Option<Progress> {
    if !line.contains("frame=") {
        return None;
    }
    let caps = progress_regex().captures(line)?;
    Some(Progress {
        frame: caps.get(1)?.as_str().parse().ok()?,
        fps: caps.get(2)?.as_str().parse().ok()?,
        time: caps.get(3)?.as_str().to_string(),
        bitrate_kbits: caps.get(4)?.as_str().parse().ok()?,
        speed: caps.get(5)?.as_str().parse().ok()?,
    })
}
