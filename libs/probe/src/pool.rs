//! The pooled, multiplexed prober.
//!
//! At most one connection per `(host, port)`, held in a bounded LRU with an
//! idle TTL. Concurrent probes to the same endpoint share the socket and are
//! told apart by `CSeq`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru_time_cache::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::{ProbeOutcome, Prober, endpoint_of};

const MAX_ENDPOINTS: usize = 64;
const IDLE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoints kept open at once; the least recently used is evicted.
    pub capacity: usize,
    /// Idle connections older than this are dropped.
    pub idle_ttl: Duration,
    /// When set, each connection sends a periodic OPTIONS keep-alive.
    pub heartbeat: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_ENDPOINTS,
            idle_ttl: IDLE_TTL,
            heartbeat: None,
        }
    }
}

pub struct ProbePool {
    endpoints: Mutex<LruCache<(String, u16), Arc<Endpoint>>>,
    heartbeat: Option<Duration>,
}

impl ProbePool {
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            endpoints: Mutex::new(LruCache::with_expiry_duration_and_capacity(
                cfg.idle_ttl,
                cfg.capacity,
            )),
            heartbeat: cfg.heartbeat,
        }
    }

    /// Drop the connection to an endpoint. Outstanding probes on it resolve
    /// `error`.
    pub async fn evict(&self, host: &str, port: u16) {
        let evicted = self
            .endpoints
            .lock()
            .await
            .remove(&(host.to_string(), port));
        if let Some(ep) = evicted {
            ep.shutdown();
            debug!("[{host}:{port}] endpoint evicted");
        }
    }

    /// Number of requests currently awaiting a response on an endpoint.
    /// Zero when the endpoint is not pooled.
    pub async fn pending_requests(&self, host: &str, port: u16) -> usize {
        self.endpoints
            .lock()
            .await
            .peek_iter()
            .find(|(key, _)| key.0 == host && key.1 == port)
            .map(|(_, ep)| ep.pending_len())
            .unwrap_or(0)
    }

    /// One connection per endpoint: the map lock is held across the
    /// connect so concurrent probes to a fresh endpoint share the socket.
    async fn endpoint(&self, host: &str, port: u16) -> Option<Arc<Endpoint>> {
        let key = (host.to_string(), port);
        let mut endpoints = self.endpoints.lock().await;
        if let Some(ep) = endpoints.get(&key) {
            if !ep.is_closed() {
                return Some(ep.clone());
            }
            endpoints.remove(&key);
        }

        let ep = Endpoint::connect(host, port).await.ok()?;
        if let Some(interval) = self.heartbeat {
            ep.start_heartbeat(interval);
        }
        endpoints.insert(key, ep.clone());
        Some(ep)
    }
}

impl Default for ProbePool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[async_trait]
impl Prober for ProbePool {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let Some((host, port)) = endpoint_of(url) else {
            return ProbeOutcome::Invalid;
        };
        // One deadline bounds connect, send, and the response wait.
        let deadline = tokio::time::Instant::now() + timeout;
        let ep = match tokio::time::timeout_at(deadline, self.endpoint(&host, port)).await {
            Ok(Some(ep)) => ep,
            Ok(None) => return ProbeOutcome::Error,
            Err(_) => return ProbeOutcome::Timeout,
        };
        let (cseq, rx) = match tokio::time::timeout_at(deadline, ep.send_describe(url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(_)) => {
                self.evict(&host, port).await;
                return ProbeOutcome::Error;
            }
            Err(_) => return ProbeOutcome::Timeout,
        };
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Endpoint torn down while we waited.
            Ok(Err(_)) => ProbeOutcome::Error,
            Err(_) => {
                ep.forget(cseq);
                ProbeOutcome::Timeout
            }
        }
    }
}
