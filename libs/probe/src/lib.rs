//! RTSP liveness probing.
//!
//! Answers "is this URL serving media right now?" by issuing an RTSP/1.0
//! `DESCRIBE` and classifying the response. The default [`ProbePool`] keeps
//! one TCP connection per `(host, port)` endpoint and multiplexes concurrent
//! probes over it, demultiplexing responses by `CSeq`. [`SerialProber`] is a
//! simpler connect-per-probe fallback implementing the same contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub mod endpoint;
pub mod message;
pub mod pool;
pub mod serial;

pub use pool::{PoolConfig, ProbePool};
pub use serial::SerialProber;

/// Default RTSP port when the URL does not carry one.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Outcome of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The endpoint answered `DESCRIBE` with a 2xx status.
    Live,
    /// The endpoint answered 404.
    NotFound,
    /// The endpoint answered something that is not an RTSP response.
    Invalid,
    /// No response arrived within the caller's deadline.
    Timeout,
    /// Transport failure, connection refused, eviction, or a non-2xx/404
    /// RTSP status.
    Error,
}

impl ProbeOutcome {
    pub fn is_live(&self) -> bool {
        matches!(self, ProbeOutcome::Live)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeOutcome::Live => "live",
            ProbeOutcome::NotFound => "not_found",
            ProbeOutcome::Invalid => "invalid",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// The probing contract consumed by the recording supervisor.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `url` for liveness, resolving within `timeout`.
    ///
    /// Never fails at the type level: every failure mode is folded into a
    /// [`ProbeOutcome`] so callers can feed it straight into their state
    /// machine.
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Split an RTSP URL into its `(host, port)` endpoint key.
pub(crate) fn endpoint_of(url: &str) -> Option<(String, u16)> {
    let parsed = url::Url::parse(url).ok()?;
    if parsed.scheme() != "rtsp" {
        return None;
    }
    let host = parsed.host_str()?.to_string();
    let port = parsed.port().unwrap_or(DEFAULT_RTSP_PORT);
    Some((host, port))
}
