//! Request line and target parsing.
//!
//! # Responsibilities
//! - Tokenize the request line into method, target and protocol
//! - Parse absolute `http://` targets and CONNECT `host[:port]` targets
//! - Report which stage rejected a malformed line
//!
//! # Design Decisions
//! - Two shapes only: `METHOD target` (HTTP/0.9) and
//!   `METHOD target HTTP/major.minor`
//! - Userinfo is stripped from the host, IPv6 brackets unwrapped
//! - Origin-form targets (`/path`) are rejected; this is a forward proxy

use std::fmt;

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

/// Which part of the request line failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Method,
    Target,
    Version,
    Header,
    Status,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::Method => "method",
            ParseStage::Target => "target",
            ParseStage::Version => "version",
            ParseStage::Header => "header",
            ParseStage::Status => "status",
        };
        f.write_str(name)
    }
}

/// A malformed request or response element.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {stage}: {reason}")]
pub struct ParseError {
    pub stage: ParseStage,
    pub reason: String,
}

impl ParseError {
    pub fn new(stage: ParseStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Negotiated `HTTP/major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const HTTP_09: Self = Self { major: 0, minor: 9 };

    /// Parse the `HTTP/x.y` token (scheme is case-insensitive).
    pub fn parse(token: &str, stage: ParseStage) -> Result<Self, ParseError> {
        let rest = token
            .get(..5)
            .filter(|scheme| scheme.eq_ignore_ascii_case("HTTP/"))
            .map(|_| &token[5..])
            .ok_or_else(|| ParseError::new(stage, format!("expected HTTP/x.y, got {token:?}")))?;

        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| ParseError::new(stage, format!("missing minor version in {token:?}")))?;
        let major = major
            .parse()
            .map_err(|_| ParseError::new(stage, format!("bad major version in {token:?}")))?;
        let minor = minor
            .parse()
            .map_err(|_| ParseError::new(stage, format!("bad minor version in {token:?}")))?;

        Ok(Self { major, minor })
    }

    /// True for HTTP/0.9 clients, which get no status line or headers back.
    pub fn is_simple(&self) -> bool {
        self.major < 1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// How the target was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `GET http://host/path` through the proxy.
    AbsoluteUrl,
    /// `CONNECT host:port` tunnel request.
    Connect,
}

/// Parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Raw protocol token, empty for HTTP/0.9.
    pub protocol: String,
    pub version: ProtocolVersion,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub kind: RequestKind,
}

impl Request {
    /// Parse a chomped, non-empty request line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_ascii_whitespace();
        let method = tokens
            .next()
            .ok_or_else(|| ParseError::new(ParseStage::Method, "empty request line"))?;
        if !method.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ParseError::new(ParseStage::Method, format!("invalid method {method:?}")));
        }
        let target = tokens
            .next()
            .ok_or_else(|| ParseError::new(ParseStage::Target, "missing request target"))?;

        let (protocol, version) = match tokens.next() {
            None => (String::new(), ProtocolVersion::HTTP_09),
            Some(token) => (token.to_string(), ProtocolVersion::parse(token, ParseStage::Version)?),
        };
        if let Some(extra) = tokens.next() {
            return Err(ParseError::new(
                ParseStage::Version,
                format!("unexpected trailing token {extra:?}"),
            ));
        }

        let authority = parse_target(method, target)?;

        Ok(Self {
            method: method.to_string(),
            protocol,
            version,
            host: authority.host,
            port: authority.port,
            path: authority.path,
            kind: authority.kind,
        })
    }

    pub fn is_connect(&self) -> bool {
        self.kind == RequestKind::Connect
    }

    /// `host` or `host:port` for the `Host` header.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == HTTP_PORT {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// The rewritten request line sent to the origin.
    pub fn origin_request_line(&self) -> String {
        format!("{} {} HTTP/1.0\r\n", self.method, self.path)
    }
}

struct Target {
    host: String,
    port: u16,
    path: String,
    kind: RequestKind,
}

fn parse_target(method: &str, target: &str) -> Result<Target, ParseError> {
    let is_http = target
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http://"));

    if is_http {
        let rest = &target[7..];
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = split_authority(authority, HTTP_PORT)?;
        Ok(Target {
            host,
            port,
            path: path.to_string(),
            kind: RequestKind::AbsoluteUrl,
        })
    } else if method == "CONNECT" {
        let (host, port) = split_authority(target, HTTPS_PORT)?;
        Ok(Target {
            host,
            port,
            path: String::new(),
            kind: RequestKind::Connect,
        })
    } else {
        Err(ParseError::new(
            ParseStage::Target,
            format!("unsupported target {target:?}"),
        ))
    }
}

/// Split `[user:pass@]host[:port]` into host and port.
fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16), ParseError> {
    let host = match authority.rfind('@') {
        Some(idx) => &authority[idx + 1..],
        None => authority,
    };

    // A ':' only introduces a port when no ']' follows it.
    let (host, port) = match host.rfind(':') {
        Some(idx) if !host[idx..].contains(']') => {
            let digits = &host[idx + 1..];
            let port = digits
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ParseError::new(ParseStage::Target, format!("invalid port {digits:?}")))?;
            (&host[..idx], port)
        }
        _ => (host, default_port),
    };

    let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(inner) => inner,
        None => host,
    };

    if host.is_empty() {
        return Err(ParseError::new(ParseStage::Target, "empty host"));
    }
    Ok((host.to_string(), port))
}
