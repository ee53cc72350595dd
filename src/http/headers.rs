//! Header collection and header-block reading.
//!
//! # Responsibilities
//! - Store headers as a case-insensitive multimap that keeps arrival order
//! - Accumulate folded (continuation) lines into a single header
//! - Read a whole header block from a socket up to the blank line
//! - Rewrite client headers for forwarding to the origin

use tokio::net::TcpStream;

use crate::http::request::{ParseError, ParseStage, Request, RequestKind};
use crate::net::buffer::{BufferError, ByteBuffer};
use crate::net::io::{self, LineError, LineLimits};

/// Headers removed from every forwarded request.
pub const HOP_HEADERS: [&str; 5] = [
    "Connection",
    "Proxy-Connection",
    "Accept",
    "Accept-Encoding",
    "User-Agent",
];

/// Fixed values injected into every forwarded request.
#[derive(Debug, Clone)]
pub struct InjectedHeaders {
    pub user_agent: String,
    pub accept: String,
    pub accept_encoding: String,
}

/// Errors raised while reading a header block.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("stream closed inside header block")]
    UnexpectedEof,
    #[error(transparent)]
    Malformed(#[from] ParseError),
    #[error(transparent)]
    Line(#[from] LineError),
}

/// Case-insensitive header multimap in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    entries: Vec<(String, String)>,
}

impl HeaderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Split a raw `Name: value` line (terminator optional) and insert it.
    ///
    /// Leading colons, spaces and tabs are trimmed from the value.
    pub fn insert_raw(&mut self, raw: &str) -> Result<(), ParseError> {
        let mut line = raw.to_string();
        io::chomp(&mut line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::new(ParseStage::Header, format!("no ':' in {line:?}")))?;
        let value = value.trim_start_matches([':', ' ', '\t']);
        self.insert(name, value);
        Ok(())
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every value stored under `name`, returning how many went.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declared `Content-Length`, if present.
    pub fn content_length(&self) -> Result<Option<u64>, ParseError> {
        match self.get("Content-Length") {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                ParseError::new(ParseStage::Header, format!("invalid Content-Length {raw:?}"))
            }),
        }
    }

    /// Append `Name: value\r\n` for every entry, byte for byte as received.
    pub fn write_to(&self, buffer: &mut ByteBuffer) -> Result<(), BufferError> {
        for (name, value) in self.iter() {
            buffer.append(&io::wire_bytes(&format!("{name}: {value}\r\n")))?;
        }
        Ok(())
    }
}

/// Outcome of feeding one line to a [`HeaderBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    More,
    Done,
}

/// Accumulates raw header lines into a [`HeaderCollection`].
///
/// Continuation lines extend the pending header. A non-continuation line
/// flushes it, unless the pending header began with `HTTP/` (a status line
/// leaking into the block), which is dropped instead.
#[derive(Debug, Default)]
pub struct HeaderBlock {
    headers: HeaderCollection,
    pending: String,
    nested_status: bool,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line, terminator included.
    pub fn feed(&mut self, line: &str) -> Result<Feed, ParseError> {
        let blank = io::is_blank_line(line);

        if blank || !io::is_fold_continuation(line) {
            if !self.nested_status && !self.pending.is_empty() {
                self.headers.insert_raw(&self.pending)?;
            }
            self.pending.clear();
            self.nested_status = false;
        }

        if blank {
            return Ok(Feed::Done);
        }

        if line
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/"))
        {
            self.nested_status = true;
        }

        self.pending.push_str(line);
        Ok(Feed::More)
    }

    pub fn finish(self) -> HeaderCollection {
        self.headers
    }
}

/// Read header lines from `stream` until the terminating blank line.
pub async fn read_headers(stream: &mut TcpStream, limits: LineLimits) -> Result<HeaderCollection, HeaderError> {
    let mut block = HeaderBlock::new();
    loop {
        let line = io::read_line(stream, limits)
            .await?
            .ok_or(HeaderError::UnexpectedEof)?;
        if block.feed(&line)? == Feed::Done {
            return Ok(block.finish());
        }
    }
}

/// Names that must not be forwarded for this request.
pub fn hop_headers(kind: RequestKind) -> Vec<&'static str> {
    let mut names = HOP_HEADERS.to_vec();
    if kind == RequestKind::Connect {
        names.push("Host");
    }
    names
}

/// Append the rewritten request head (line, injected and surviving headers,
/// blank line) to `buffer`. Consumes the client's headers.
pub fn write_forwarded_request(
    request: &Request,
    mut headers: HeaderCollection,
    injected: &InjectedHeaders,
    buffer: &mut ByteBuffer,
) -> Result<(), BufferError> {
    // Tokens listed in Connection are hop-by-hop as well.
    let listed: Vec<String> = headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("Connection"))
        .flat_map(|(_, value)| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name);
    }
    for name in hop_headers(request.kind) {
        headers.remove(name);
    }

    buffer.append(&io::wire_bytes(&request.origin_request_line()))?;
    buffer.append(b"Connection: close\r\n")?;
    buffer.append(b"Proxy-Connection: close\r\n")?;
    buffer.append(format!("User-Agent: {}\r\n", injected.user_agent).as_bytes())?;
    buffer.append(format!("Accept: {}\r\n", injected.accept).as_bytes())?;
    buffer.append(format!("Accept-Encoding: {}\r\n", injected.accept_encoding).as_bytes())?;
    if request.kind == RequestKind::AbsoluteUrl && !headers.contains("Host") {
        buffer.append(&io::wire_bytes(&format!("Host: {}\r\n", request.host_header())))?;
    }
    headers.write_to(buffer)?;
    buffer.append(b"\r\n")
}
