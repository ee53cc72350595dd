//! Chunked byte buffer with resumable partial sends.
//!
//! # Responsibilities
//! - Queue immutable byte chunks in arrival order
//! - Drain to a writer one `write` call at a time, resuming mid-chunk
//! - Fill from a reader one `read` call at a time
//! - Flatten to / rebuild from a single contiguous value (cache path)
//!
//! # Design Decisions
//! - Owned by exactly one connection; no interior locking
//! - Transient errors (`Interrupted`, `WouldBlock`) surface as `Ok(0)`
//! - End-of-stream on fill is an error, never a zero-length success

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors raised by buffer I/O.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Memory for a new chunk could not be reserved.
    #[error("failed to allocate {0} bytes for buffer chunk")]
    Alloc(usize),
    /// The peer closed the stream.
    #[error("stream closed by peer")]
    Closed,
    /// The writer accepted zero bytes for a non-empty chunk.
    #[error("writer accepted zero bytes")]
    WriteZero,
    /// Any other socket failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// One queued fragment and its send cursor.
#[derive(Debug)]
struct Chunk {
    data: Bytes,
    pos: usize,
}

impl Chunk {
    fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }
}

/// An ordered queue of byte chunks.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    chunks: VecDeque<Chunk>,
    /// Bytes queued and not yet sent.
    size: usize,
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` into a new chunk at the tail.
    pub fn append(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(data.len())
            .map_err(|_| BufferError::Alloc(data.len()))?;
        owned.extend_from_slice(data);
        self.push_chunk(Bytes::from(owned));
        Ok(())
    }

    /// Queue an already-owned chunk without copying.
    pub fn append_bytes(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.push_chunk(data);
        }
    }

    fn push_chunk(&mut self, data: Bytes) {
        self.size += data.len();
        self.chunks.push_back(Chunk { data, pos: 0 });
    }

    /// Total bytes still queued.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of chunks currently queued.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Send from the head chunk's cursor with a single `write` call.
    ///
    /// Returns the bytes written, `0` when the writer reported a transient
    /// condition, or an error for fatal failures. Fully sent chunks are
    /// released.
    pub async fn drain_to<W>(&mut self, writer: &mut W) -> Result<usize, BufferError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(head) = self.chunks.front_mut() else {
            return Ok(0);
        };

        let sent = match writer.write(head.remaining()).await {
            Ok(0) => return Err(BufferError::WriteZero),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(0),
            Err(e) => return Err(BufferError::Io(e)),
        };

        head.pos += sent;
        if head.pos == head.data.len() {
            self.chunks.pop_front();
        }
        self.size -= sent;
        Ok(sent)
    }

    /// Read up to `limit` bytes with a single `read` call into a new chunk.
    ///
    /// Returns the bytes read, `0` on a transient condition, or
    /// `BufferError::Closed` at end-of-stream.
    pub async fn fill_from<R>(&mut self, reader: &mut R, limit: usize) -> Result<usize, BufferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(limit)
            .map_err(|_| BufferError::Alloc(limit))?;
        scratch.resize(limit, 0);

        match reader.read(&mut scratch).await {
            Ok(0) if limit > 0 => Err(BufferError::Closed),
            Ok(n) => {
                scratch.truncate(n);
                self.append_bytes(Bytes::from(scratch));
                Ok(n)
            }
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(BufferError::Io(e)),
        }
    }

    /// Drain everything to `writer`, retrying transient conditions.
    pub async fn write_all_to<W>(&mut self, writer: &mut W) -> Result<usize, BufferError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut total = 0;
        while !self.is_empty() {
            match self.drain_to(writer).await? {
                0 => tokio::task::yield_now().await,
                n => total += n,
            }
        }
        writer.flush().await?;
        Ok(total)
    }

    /// Materialize the unsent bytes as one contiguous value.
    pub fn to_flat(&self) -> Bytes {
        if self.chunks.len() == 1 {
            let only = &self.chunks[0];
            return only.data.slice(only.pos..);
        }
        let mut flat = Vec::with_capacity(self.size);
        for chunk in &self.chunks {
            flat.extend_from_slice(chunk.remaining());
        }
        Bytes::from(flat)
    }

    /// Append `flat` split on line boundaries, one chunk per line.
    ///
    /// A trailing fragment without `\n` becomes the last chunk.
    pub fn load_from_flat(&mut self, flat: &Bytes) {
        let mut start = 0;
        for (i, byte) in flat.iter().enumerate() {
            if *byte == b'\n' {
                self.append_bytes(flat.slice(start..=i));
                start = i + 1;
            }
        }
        if start < flat.len() {
            self.append_bytes(flat.slice(start..));
        }
    }

    /// Drop every queued chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer that accepts at most `cap` bytes per call and reports
    /// `WouldBlock` on every other call.
    struct ChokedWriter {
        cap: usize,
        out: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for ChokedWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Poll::Ready(Err(io::ErrorKind::WouldBlock.into()));
            }
            let n = buf.len().min(self.cap);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn append_tracks_size() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET / HTTP/1.0\r\n").unwrap();
        buf.append(b"\r\n").unwrap();
        buf.append(b"").unwrap();
        assert_eq!(buf.size(), 18);
        assert_eq!(buf.chunk_count(), 2);
    }

    #[tokio::test]
    async fn partial_drain_resumes_mid_chunk() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello ").unwrap();
        buf.append(b"world").unwrap();
        let mut writer = ChokedWriter { cap: 4, out: Vec::new(), calls: 0 };

        assert_eq!(buf.drain_to(&mut writer).await.unwrap(), 4);
        assert_eq!(buf.size(), 7);
        assert_eq!(buf.chunk_count(), 2);

        // Second call hits WouldBlock and reports zero progress.
        assert_eq!(buf.drain_to(&mut writer).await.unwrap(), 0);
        assert_eq!(buf.size(), 7);

        assert_eq!(buf.drain_to(&mut writer).await.unwrap(), 2);
        assert_eq!(buf.chunk_count(), 1);

        let sent = buf.write_all_to(&mut writer).await.unwrap();
        assert_eq!(sent, 5);
        assert!(buf.is_empty());
        assert_eq!(writer.out, b"hello world");
    }

    #[tokio::test]
    async fn fill_reports_closed_at_eof() {
        let mut buf = ByteBuffer::new();
        let mut reader: &[u8] = b"abcdef";

        assert_eq!(buf.fill_from(&mut reader, 4).await.unwrap(), 4);
        assert_eq!(buf.fill_from(&mut reader, 4).await.unwrap(), 2);
        assert!(matches!(
            buf.fill_from(&mut reader, 4).await,
            Err(BufferError::Closed)
        ));
        assert_eq!(&buf.to_flat()[..], b"abcdef");
    }

    #[tokio::test]
    async fn to_flat_skips_sent_bytes() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc").unwrap();
        buf.append(b"def").unwrap();
        let mut writer = ChokedWriter { cap: 2, out: Vec::new(), calls: 0 };
        buf.drain_to(&mut writer).await.unwrap();
        assert_eq!(&buf.to_flat()[..], b"cdef");
    }

    #[test]
    fn flat_round_trip_preserves_size() {
        let mut original = ByteBuffer::new();
        original.append(b"HTTP/1.0 200 OK\r\n").unwrap();
        original.append(b"Content-Length: 3\r\n").unwrap();
        original.append(b"\r\n").unwrap();
        original.append(b"ok\n").unwrap();

        let flat = original.to_flat();
        let mut rebuilt = ByteBuffer::new();
        rebuilt.load_from_flat(&flat);

        assert_eq!(rebuilt.size(), original.size());
        assert_eq!(rebuilt.chunk_count(), 4);
        assert_eq!(rebuilt.to_flat(), flat);
    }

    #[test]
    fn load_keeps_unterminated_tail() {
        let mut buf = ByteBuffer::new();
        buf.load_from_flat(&Bytes::from_static(b"a\nb\nbody"));
        assert_eq!(buf.chunk_count(), 3);
        assert_eq!(buf.size(), 8);
    }
}
