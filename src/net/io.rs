//! Socket I/O primitives shared by the request and response paths.
//!
//! # Responsibilities
//! - Read exactly one line from a socket without over-consuming
//! - Write a whole byte slice, retrying transient conditions
//! - Render formatted messages straight to a socket
//! - Line helpers (`chomp`, blank-line and fold detection)
//! - Lossless byte/text mapping for protocol lines

use std::fmt::{self, Write as _};
use std::future::{poll_fn, Future};
use std::io;
use std::net::SocketAddr;
use std::task::Poll;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::net::buffer::{BufferError, ByteBuffer};

/// Bounds applied while reading a single line.
#[derive(Debug, Clone, Copy)]
pub struct LineLimits {
    /// Bytes peeked per attempt.
    pub segment_length: usize,
    /// Longest line accepted before giving up.
    pub max_line_length: usize,
}

impl Default for LineLimits {
    fn default() -> Self {
        Self {
            segment_length: 512,
            max_line_length: 128 * 1024,
        }
    }
}

/// Errors raised by `read_line`.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Read one `\n`-terminated line, terminator included.
///
/// Peeks ahead in segments and consumes only the bytes that belong to the
/// line, so anything after it stays in the socket. Returns `Ok(None)` when
/// the peer closes before a terminator arrives.
pub async fn read_line(stream: &mut TcpStream, limits: LineLimits) -> Result<Option<String>, LineError> {
    let mut scratch = ByteBuffer::new();
    let mut segment = vec![0u8; limits.segment_length.max(1)];

    loop {
        let peeked = match stream.peek(&mut segment).await {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LineError::Io(e)),
        };

        let (take, terminated) = match segment[..peeked].iter().position(|b| *b == b'\n') {
            Some(idx) => (idx + 1, true),
            None => (peeked, false),
        };

        if scratch.size() + take > limits.max_line_length {
            return Err(LineError::TooLong {
                limit: limits.max_line_length,
            });
        }

        stream.read_exact(&mut segment[..take]).await?;
        scratch.append(&segment[..take])?;

        if terminated {
            break;
        }
    }

    Ok(Some(decode_wire(&scratch.to_flat())))
}

/// Decode raw protocol bytes one char per byte (ISO-8859-1).
///
/// Every byte value maps to a distinct char, so [`wire_bytes`] recovers the
/// exact input. Structure (spaces, `:`, CRLF) stays ASCII.
pub fn decode_wire(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode text produced by [`decode_wire`] back to its original bytes.
///
/// Chars above U+00FF cannot come off the wire and are written as UTF-8.
pub fn wire_bytes(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match u8::try_from(c) {
            Ok(b) => out.push(b),
            Err(_) => out.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes()),
        }
    }
    out
}

/// Write all of `data`, retrying on interruption.
pub async fn write_all<W>(writer: &mut W, data: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;
    while sent < data.len() {
        match writer.write(&data[sent..]).await {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => tokio::task::yield_now().await,
            Err(e) => return Err(e),
        }
    }
    writer.flush().await?;
    Ok(sent)
}

/// Render `args` and send the result with [`write_all`].
///
/// Rendering happens before the returned future is created, so it does not
/// hold the arguments across an await.
pub fn write_message<'a, W>(
    writer: &'a mut W,
    args: fmt::Arguments<'_>,
) -> impl Future<Output = io::Result<usize>> + 'a
where
    W: AsyncWrite + Unpin + 'a,
{
    let mut rendered = String::with_capacity(256);
    let formatted = rendered.write_fmt(args);
    async move {
        formatted.map_err(|_| io::Error::other("message formatting failed"))?;
        write_all(writer, rendered.as_bytes()).await
    }
}

/// Peek up to `buf.len()` pending bytes without waiting for more.
///
/// Returns `Ok(0)` when nothing is buffered right now.
pub async fn peek_pending(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut read_buf = ReadBuf::new(buf);
    poll_fn(|cx| match stream.poll_peek(cx, &mut read_buf) {
        Poll::Pending => Poll::Ready(Ok(0)),
        ready => ready,
    })
    .await
}

/// Strip trailing CR/LF characters, returning how many were removed.
pub fn chomp(line: &mut String) -> usize {
    let kept = line.trim_end_matches(['\r', '\n']).len();
    let removed = line.len() - kept;
    line.truncate(kept);
    removed
}

/// A bare `\n` or `\r\n`.
pub fn is_blank_line(line: &str) -> bool {
    line == "\n" || line == "\r\n"
}

/// A header line that continues the previous one.
pub fn is_fold_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

/// Numeric form of the address, without the port.
pub fn ip_string(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[test]
    fn chomp_counts_removed_terminators() {
        let mut crlf = "Host: example.com\r\n".to_string();
        assert_eq!(chomp(&mut crlf), 2);
        assert_eq!(crlf, "Host: example.com");

        let mut lf = "Host: example.com\n".to_string();
        assert_eq!(chomp(&mut lf), 1);

        let mut bare = "Host: example.com".to_string();
        let len = bare.len();
        assert_eq!(chomp(&mut bare), 0);
        assert_eq!(bare.len(), len);

        let mut blank = "\r\n".to_string();
        assert_eq!(chomp(&mut blank), 2);
        assert!(blank.is_empty());
    }

    #[test]
    fn line_classification() {
        assert!(is_blank_line("\r\n"));
        assert!(is_blank_line("\n"));
        assert!(!is_blank_line(" \r\n"));
        assert!(is_fold_continuation("\tmore"));
        assert!(is_fold_continuation(" more"));
        assert!(!is_fold_continuation("Accept: */*"));
    }

    #[test]
    fn wire_text_keeps_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        let text = decode_wire(&all);
        assert_eq!(text.chars().count(), 256);
        assert_eq!(wire_bytes(&text), all);

        // Distinct high bytes stay distinct.
        assert_ne!(decode_wire(b"/r\xE9"), decode_wire(b"/r\xE8"));
        assert_eq!(wire_bytes("caf\u{e9}"), b"caf\xE9");
    }

    #[tokio::test]
    async fn read_line_keeps_non_utf8_bytes() {
        let (mut client, mut server) = socket_pair().await;
        client.write_all(b"X-Name: caf\xE9\r\n").await.unwrap();

        let line = read_line(&mut server, LineLimits::default()).await.unwrap().unwrap();
        assert_eq!(wire_bytes(&line), b"X-Name: caf\xE9\r\n");
    }

    #[tokio::test]
    async fn read_line_leaves_following_bytes_unread() {
        let (mut client, mut server) = socket_pair().await;
        client
            .write_all(b"GET http://example.com/ HTTP/1.0\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let limits = LineLimits::default();
        let first = read_line(&mut server, limits).await.unwrap().unwrap();
        assert_eq!(first, "GET http://example.com/ HTTP/1.0\r\n");
        let second = read_line(&mut server, limits).await.unwrap().unwrap();
        assert_eq!(second, "Host: example.com\r\n");
        let third = read_line(&mut server, limits).await.unwrap().unwrap();
        assert_eq!(third, "\r\n");
    }

    #[tokio::test]
    async fn read_line_spans_segments() {
        let (mut client, mut server) = socket_pair().await;
        let long = format!("X-Long: {}\n", "a".repeat(40));
        client.write_all(long.as_bytes()).await.unwrap();

        let limits = LineLimits {
            segment_length: 8,
            max_line_length: 1024,
        };
        let line = read_line(&mut server, limits).await.unwrap().unwrap();
        assert_eq!(line, long);
    }

    #[tokio::test]
    async fn read_line_rejects_oversized_lines() {
        let (mut client, mut server) = socket_pair().await;
        client.write_all(&[b'a'; 64]).await.unwrap();

        let limits = LineLimits {
            segment_length: 16,
            max_line_length: 32,
        };
        let err = read_line(&mut server, limits).await.unwrap_err();
        assert!(matches!(err, LineError::TooLong { limit: 32 }));
    }

    #[tokio::test]
    async fn read_line_reports_clean_eof() {
        let (client, mut server) = socket_pair().await;
        drop(client);
        let line = read_line(&mut server, LineLimits::default()).await.unwrap();
        assert!(line.is_none());
    }

    #[tokio::test]
    async fn write_message_renders_arguments() {
        let mut out = Vec::new();
        let sent = write_message(&mut out, format_args!("HTTP/1.0 {} {}\r\n", 501, "Not Implemented"))
            .await
            .unwrap();
        assert_eq!(out, b"HTTP/1.0 501 Not Implemented\r\n");
        assert_eq!(sent, out.len());
    }

    #[tokio::test]
    async fn peek_pending_does_not_wait() {
        let (mut client, server) = socket_pair().await;
        let mut buf = [0u8; 2];
        assert_eq!(peek_pending(&server, &mut buf).await.unwrap(), 0);

        client.write_all(b"\r\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(peek_pending(&server, &mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"\r\n");
    }
}
