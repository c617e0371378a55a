//! One pooled connection to an RTSP endpoint.
//!
//! The endpoint owns the socket, the monotonic `CSeq` counter, and the map
//! of outstanding requests. A reader task parses the receive stream
//! incrementally and resolves pending probes by `CSeq`; responses that match
//! nothing are dropped. Transport failure fails every outstanding probe with
//! [`ProbeOutcome::Error`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::ProbeOutcome;
use crate::message::ResponseParser;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("endpoint connection is closed")]
    Closed,
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

pub(crate) enum Pending {
    Probe(oneshot::Sender<ProbeOutcome>),
    /// Keep-alive OPTIONS; the response is demultiplexed and discarded.
    Heartbeat,
}

type PendingMap = Arc<StdMutex<HashMap<u32, Pending>>>;

pub struct Endpoint {
    host: String,
    port: u16,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    /// CSeq of the next request; guarded by the pending-map lock so that
    /// CSeq assignment and pending insertion are one atomic step.
    next_cseq: StdMutex<u32>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    pub async fn connect(host: &str, port: u16) -> Result<Arc<Self>, EndpointError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(EndpointError::Connect)?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            closed.clone(),
            format!("{host}:{port}"),
        ));

        Ok(Arc::new(Self {
            host: host.to_string(),
            port,
            writer: Mutex::new(write_half),
            pending,
            next_cseq: StdMutex::new(0),
            closed,
            reader,
            heartbeat: StdMutex::new(None),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Send a `DESCRIBE` for `url`, returning the assigned CSeq and the
    /// receiver that resolves with the classified response.
    pub async fn send_describe(
        &self,
        url: &str,
    ) -> Result<(u32, oneshot::Receiver<ProbeOutcome>), EndpointError> {
        if self.is_closed() {
            return Err(EndpointError::Closed);
        }
        // Hold the writer for the whole send so requests hit the wire in
        // CSeq order.
        let mut writer = self.writer.lock().await;
        let (cseq, rx) = {
            let mut pending = self.pending.lock().unwrap();
            let mut next = self.next_cseq.lock().unwrap();
            *next += 1;
            let cseq = *next;
            let (tx, rx) = oneshot::channel();
            pending.insert(cseq, Pending::Probe(tx));
            (cseq, rx)
        };
        let request = format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: {cseq}\r\n\r\n");
        if let Err(e) = writer.write_all(request.as_bytes()).await {
            self.pending.lock().unwrap().remove(&cseq);
            self.mark_closed();
            return Err(EndpointError::Write(e));
        }
        trace!("[{}:{}] sent DESCRIBE cseq={}", self.host, self.port, cseq);
        Ok((cseq, rx))
    }

    /// Forget a request whose caller-side timer expired. The socket stays
    /// open; a late response will simply find no match and be dropped.
    pub fn forget(&self, cseq: u32) {
        self.pending.lock().unwrap().remove(&cseq);
    }

    /// Arm the periodic OPTIONS keep-alive for this connection.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(ep) = weak.upgrade() else { break };
                if ep.is_closed() || ep.send_options().await.is_err() {
                    break;
                }
            }
        });
        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    async fn send_options(&self) -> Result<(), EndpointError> {
        let mut writer = self.writer.lock().await;
        let cseq = {
            let mut pending = self.pending.lock().unwrap();
            let mut next = self.next_cseq.lock().unwrap();
            *next += 1;
            let cseq = *next;
            pending.insert(cseq, Pending::Heartbeat);
            cseq
        };
        let request = format!(
            "OPTIONS rtsp://{}:{} RTSP/1.0\r\nCSeq: {cseq}\r\n\r\n",
            self.host, self.port
        );
        if let Err(e) = writer.write_all(request.as_bytes()).await {
            self.pending.lock().unwrap().remove(&cseq);
            self.mark_closed();
            return Err(EndpointError::Write(e));
        }
        trace!("[{}:{}] heartbeat cseq={}", self.host, self.port, cseq);
        Ok(())
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        fail_all(&self.pending);
    }

    /// Tear the connection down: stop the background tasks and resolve every
    /// outstanding request as `error`. Used on eviction, where in-flight
    /// probes may still hold a handle to this endpoint.
    pub fn shutdown(&self) {
        self.reader.abort();
        if let Some(h) = self.heartbeat.lock().unwrap().take() {
            h.abort();
        }
        self.mark_closed();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(h) = self.heartbeat.lock().unwrap().take() {
            h.abort();
        }
        self.closed.store(true, Ordering::Release);
        fail_all(&self.pending);
    }
}

/// Resolve every outstanding request as `error` and empty the map.
fn fail_all(pending: &PendingMap) {
    let drained: Vec<Pending> = pending.lock().unwrap().drain().map(|(_, p)| p).collect();
    for entry in drained {
        if let Pending::Probe(tx) = entry {
            let _ = tx.send(ProbeOutcome::Error);
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, pending: PendingMap, closed: Arc<AtomicBool>, label: String) {
    let mut parser = ResponseParser::new();
    let mut chunk = [0u8; 4096];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!("[{label}] connection closed by peer");
                break;
            }
            Ok(n) => {
                if !parser.extend(&chunk[..n]) {
                    warn!("[{label}] receive buffer overflow, dropping connection");
                    break;
                }
                while let Some(response) = parser.next_response() {
                    let Some(cseq) = response.cseq else {
                        trace!("[{label}] response without CSeq dropped");
                        continue;
                    };
                    match pending.lock().unwrap().remove(&cseq) {
                        Some(Pending::Probe(tx)) => {
                            let _ = tx.send(response.classify());
                        }
                        Some(Pending::Heartbeat) => {
                            trace!("[{label}] heartbeat answered cseq={cseq}");
                        }
                        None => {
                            trace!("[{label}] unsolicited response cseq={cseq} dropped");
                        }
                    }
                }
            }
            Err(e) => {
                debug!("[{label}] read error: {e}");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
    fail_all(&pending);
}
