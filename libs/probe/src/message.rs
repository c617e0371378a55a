//! Incremental parsing of RTSP responses off a raw TCP stream.
//!
//! One message is a start line, header lines, a blank line, then a body when
//! `Content-Length` says so. Some servers omit `Content-Length` on the SDP
//! answer to `DESCRIBE`; when the bytes after the headers begin with `v=`,
//! the whole buffered remainder is consumed as the body.

use crate::ProbeOutcome;

/// A response as far as the demultiplexer cares: where to route it and what
/// it classifies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub cseq: Option<u32>,
    pub status: StartLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLine {
    /// `RTSP/1.0 <code> <reason>` with a numeric code.
    Status(u16),
    /// Anything else.
    Invalid,
}

impl ParsedResponse {
    /// Classify for the probe contract: 2xx live, 404 not found, other RTSP
    /// statuses error, non-RTSP garbage invalid.
    pub fn classify(&self) -> ProbeOutcome {
        match self.status {
            StartLine::Status(code) if (200..300).contains(&code) => ProbeOutcome::Live,
            StartLine::Status(404) => ProbeOutcome::NotFound,
            StartLine::Status(_) => ProbeOutcome::Error,
            StartLine::Invalid => ProbeOutcome::Invalid,
        }
    }
}

/// Receive-buffer parser for one connection. Feed bytes with [`extend`],
/// drain complete responses with [`next_response`].
///
/// [`extend`]: ResponseParser::extend
/// [`next_response`]: ResponseParser::next_response
#[derive(Debug, Default)]
pub struct ResponseParser {
    buf: Vec<u8>,
}

/// Hard cap on the receive buffer; a peer that sends this much without a
/// complete message is not speaking RTSP.
pub const MAX_BUFFER: usize = 64 * 1024;

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes. Returns `false` when the buffer cap is
    /// exceeded, at which point the connection should be torn down.
    pub fn extend(&mut self, data: &[u8]) -> bool {
        self.buf.extend_from_slice(data);
        self.buf.len() <= MAX_BUFFER
    }

    /// Pop the next complete response off the buffer, if one is there.
    pub fn next_response(&mut self) -> Option<ParsedResponse> {
        let header_end = find_header_end(&self.buf)?;
        let head = &self.buf[..header_end];
        let head_text = String::from_utf8_lossy(head);
        let mut lines = head_text.split("\r\n");

        let status = parse_start_line(lines.next().unwrap_or(""));
        let mut cseq = None;
        let mut content_length: Option<usize> = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("cseq") {
                cseq = value.parse().ok();
            } else if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            }
        }

        let body_start = header_end + 4;
        let consumed = match content_length {
            Some(len) => {
                if self.buf.len() < body_start + len {
                    return None;
                }
                body_start + len
            }
            None => {
                // SDP heuristic: no Content-Length, body starts with "v=".
                if self.buf[body_start..].starts_with(b"v=") {
                    self.buf.len()
                } else {
                    body_start
                }
            }
        };

        self.buf.drain(..consumed);
        Some(ParsedResponse { cseq, status })
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_start_line(line: &str) -> StartLine {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("RTSP/") {
        return StartLine::Invalid;
    }
    match parts.next().and_then(|s| s.parse::<u16>().ok()) {
        Some(code) => StartLine::Status(code),
        None => StartLine::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ResponseParser, text: &str) {
        assert!(parser.extend(text.as_bytes()));
    }

    #[test]
    fn parses_ok_with_content_length() {
        let mut p = ResponseParser::new();
        feed(
            &mut p,
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 11\r\n\r\nv=0\r\no=- 0 ",
        );
        let r = p.next_response().unwrap();
        assert_eq!(r.cseq, Some(3));
        assert_eq!(r.status, StartLine::Status(200));
        assert_eq!(r.classify(), ProbeOutcome::Live);
        assert!(p.next_response().is_none());
    }

    #[test]
    fn waits_for_full_body() {
        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 10\r\n\r\nv=0");
        assert!(p.next_response().is_none());
        feed(&mut p, "\r\no=- 0 ");
        assert!(p.next_response().is_some());
    }

    #[test]
    fn waits_for_header_terminator() {
        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 200 OK\r\nCSeq: 1\r\n");
        assert!(p.next_response().is_none());
        feed(&mut p, "\r\n");
        assert!(p.next_response().is_some());
    }

    #[test]
    fn sdp_heuristic_consumes_remainder() {
        let mut p = ResponseParser::new();
        feed(
            &mut p,
            "RTSP/1.0 200 OK\r\nCSeq: 7\r\n\r\nv=0\r\nm=video 0 RTP/AVP 96\r\n",
        );
        let r = p.next_response().unwrap();
        assert_eq!(r.cseq, Some(7));
        // The whole remainder was the body; nothing left over.
        assert!(p.next_response().is_none());
        assert!(p.buf.is_empty());
    }

    #[test]
    fn no_content_length_no_sdp_has_empty_body() {
        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 404 Not Found\r\nCSeq: 2\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n");
        let first = p.next_response().unwrap();
        assert_eq!(first.classify(), ProbeOutcome::NotFound);
        let second = p.next_response().unwrap();
        assert_eq!(second.cseq, Some(3));
        assert_eq!(second.classify(), ProbeOutcome::Live);
    }

    #[test]
    fn classifies_other_statuses_as_error() {
        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 454 Session Not Found\r\nCSeq: 9\r\n\r\n");
        assert_eq!(p.next_response().unwrap().classify(), ProbeOutcome::Error);
    }

    #[test]
    fn non_rtsp_start_line_is_invalid() {
        let mut p = ResponseParser::new();
        feed(&mut p, "HTTP/1.1 200 OK\r\nCSeq: 4\r\n\r\n");
        let r = p.next_response().unwrap();
        assert_eq!(r.status, StartLine::Invalid);
        assert_eq!(r.cseq, Some(4));
        assert_eq!(r.classify(), ProbeOutcome::Invalid);

        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 abc OK\r\nCSeq: 5\r\n\r\n");
        assert_eq!(p.next_response().unwrap().classify(), ProbeOutcome::Invalid);
    }

    #[test]
    fn missing_cseq_is_reported() {
        let mut p = ResponseParser::new();
        feed(&mut p, "RTSP/1.0 200 OK\r\nServer: cam\r\n\r\n");
        assert_eq!(p.next_response().unwrap().cseq, None);
    }

    #[test]
    fn buffer_cap_trips() {
        let mut p = ResponseParser::new();
        let garbage = vec![b'x'; MAX_BUFFER + 1];
        assert!(!p.extend(&garbage));
    }
}
