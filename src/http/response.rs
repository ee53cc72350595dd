//! Origin response head parsing and rewriting.
//!
//! # Responsibilities
//! - Parse the origin status line (`HTTP/x.y code reason`)
//! - Collect the response header block
//! - Re-emit the head for the client as HTTP/1.0 with `Connection: close`
//!
//! # Design Decisions
//! - Stray blank lines before the status line are skipped
//! - HTTP/0.9 clients get the body only; the head is still cached for others

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::http::headers::{self, HeaderCollection, HeaderError};
use crate::http::request::{ParseError, ParseStage, ProtocolVersion};
use crate::net::buffer::{BufferError, ByteBuffer};
use crate::net::io::{self, LineLimits};

/// Response headers that only describe the origin hop.
pub const RESPONSE_HOP_HEADERS: [&str; 3] = ["Connection", "Proxy-Connection", "Keep-Alive"];

/// Parsed origin status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: ProtocolVersion,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    /// Parse a chomped status line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.splitn(3, ' ');
        let version = ProtocolVersion::parse(parts.next().unwrap_or_default(), ParseStage::Status)?;
        let code = parts
            .next()
            .filter(|c| c.len() == 3)
            .and_then(|c| c.parse::<u16>().ok())
            .filter(|c| (100..=999).contains(c))
            .ok_or_else(|| ParseError::new(ParseStage::Status, format!("bad status code in {line:?}")))?;
        let reason = parts.next().unwrap_or_default().trim().to_string();
        Ok(Self { version, code, reason })
    }

    /// Status line as relayed to the client.
    pub fn client_line(&self) -> String {
        if self.reason.is_empty() {
            format!("HTTP/1.0 {}\r\n", self.code)
        } else {
            format!("HTTP/1.0 {} {}\r\n", self.code, self.reason)
        }
    }
}

/// Status line plus headers of an origin response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusLine,
    pub headers: HeaderCollection,
}

impl ResponseHead {
    /// Declared body length from the origin, if any.
    pub fn content_length(&self) -> Result<Option<u64>, ParseError> {
        self.headers.content_length()
    }

    /// Append the rewritten head (HTTP/1.0, `Connection: close`) to `buffer`.
    pub fn write_to(&self, buffer: &mut ByteBuffer) -> Result<(), BufferError> {
        let mut relayed = self.headers.clone();
        for name in RESPONSE_HOP_HEADERS {
            relayed.remove(name);
        }

        buffer.append(&io::wire_bytes(&self.status.client_line()))?;
        buffer.append(b"Connection: close\r\n")?;
        relayed.write_to(buffer)?;
        buffer.append(b"\r\n")
    }
}

/// The part of a rewritten response a client speaking `client` receives.
///
/// HTTP/0.9 clients get everything after the head's terminating blank line.
pub fn client_view(response: &Bytes, client: ProtocolVersion) -> Bytes {
    if !client.is_simple() {
        return response.clone();
    }
    match response.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => response.slice(end + 4..),
        None => Bytes::new(),
    }
}

/// Read the status line and header block from the origin.
pub async fn read_response_head(origin: &mut TcpStream, limits: LineLimits) -> Result<ResponseHead, HeaderError> {
    let status = loop {
        let mut line = io::read_line(origin, limits)
            .await?
            .ok_or(HeaderError::UnexpectedEof)?;
        io::chomp(&mut line);
        if !line.is_empty() {
            break StatusLine::parse(&line)?;
        }
    };
    let headers = headers::read_headers(origin, limits).await?;
    Ok(ResponseHead { status, headers })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(lines: &[(&str, &str)]) -> ResponseHead {
        let mut headers = HeaderCollection::new();
        for (name, value) in lines {
            headers.insert(*name, *value);
        }
        ResponseHead {
            status: StatusLine::parse("HTTP/1.1 200 OK").unwrap(),
            headers,
        }
    }

    #[test]
    fn parses_status_lines() {
        let status = StatusLine::parse("HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(status.version, ProtocolVersion { major: 1, minor: 1 });
        assert_eq!(status.code, 404);
        assert_eq!(status.reason, "Not Found");
        assert_eq!(status.client_line(), "HTTP/1.0 404 Not Found\r\n");

        let bare = StatusLine::parse("HTTP/1.0 204").unwrap();
        assert_eq!(bare.client_line(), "HTTP/1.0 204\r\n");
    }

    #[test]
    fn rejects_bad_status_lines() {
        for line in ["HTTP/1.1", "HTTP/1.1 OK", "HTTP/1.1 2000 Huge", "ICY 200 OK"] {
            let err = StatusLine::parse(line).unwrap_err();
            assert_eq!(err.stage, ParseStage::Status, "line {line:?}");
        }
    }

    #[test]
    fn client_head_is_http10_with_close() {
        let head = head(&[
            ("Content-Type", "text/plain"),
            ("Connection", "keep-alive"),
            ("Keep-Alive", "timeout=5"),
            ("Content-Length", "2"),
        ]);
        let mut buffer = ByteBuffer::new();
        head.write_to(&mut buffer).unwrap();

        let text = String::from_utf8(buffer.to_flat().to_vec()).unwrap();
        assert_eq!(
            text,
            "HTTP/1.0 200 OK\r\n\
             Connection: close\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 2\r\n\
             \r\n"
        );
        assert_eq!(head.content_length().unwrap(), Some(2));
    }

    #[test]
    fn simple_clients_get_body_only() {
        let response = Bytes::from_static(b"HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nhi");
        assert_eq!(client_view(&response, ProtocolVersion::HTTP_09), Bytes::from_static(b"hi"));
        assert_eq!(
            client_view(&response, ProtocolVersion { major: 1, minor: 1 }),
            response
        );
    }
}
