//! Connect-per-probe fallback strategy.
//!
//! One TCP connection, one `DESCRIBE`, one response, no demultiplexing.
//! Costs a connection per probe but has no shared state; useful when a
//! camera misbehaves with pooled connections.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::message::ResponseParser;
use crate::{ProbeOutcome, Prober, endpoint_of};

#[derive(Debug, Default)]
pub struct SerialProber;

impl SerialProber {
    pub fn new() -> Self {
        Self
    }

    async fn exchange(url: &str, host: &str, port: u16) -> ProbeOutcome {
        let mut stream = match TcpStream::connect((host, port)).await {
            Ok(s) => s,
            Err(_) => return ProbeOutcome::Error,
        };
        let request = format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        if stream.write_all(request.as_bytes()).await.is_err() {
            return ProbeOutcome::Error;
        }
        trace!("[{host}:{port}] serial DESCRIBE sent");

        let mut parser = ResponseParser::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => return ProbeOutcome::Error,
                Ok(n) => {
                    if !parser.extend(&chunk[..n]) {
                        return ProbeOutcome::Invalid;
                    }
                    if let Some(response) = parser.next_response() {
                        return response.classify();
                    }
                }
                Err(_) => return ProbeOutcome::Error,
            }
        }
    }
}

#[async_trait]
impl Prober for SerialProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let Some((host, port)) = endpoint_of(url) else {
            return ProbeOutcome::Invalid;
        };
        match tokio::time::timeout(timeout, Self::exchange(url, &host, port)).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}
