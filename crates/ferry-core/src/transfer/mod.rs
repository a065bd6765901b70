//! File transfer engine for Ferry.
//!
//! Moves a file's bytes across the connection in fixed-size chunks, in file
//! order, with at most one chunk buffered. The engine does not care which side
//! of the session it runs on: uploads use [`send_file`] on the client and
//! [`receive_file`] on the server, downloads the other way round.
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 1 KiB ([`crate::DEFAULT_CHUNK_SIZE`])
//! - The size is announced by the handler before the bytes; no framing
//!   inside the byte run
//! - Progress is reported after every chunk

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Sleep;

use crate::error::{Error, ProtocolError, Result};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Reading a file and writing it to the stream
    Send,
    /// Reading the stream and writing it to a file
    Receive,
}

/// Progress information for a transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Bytes moved so far
    pub bytes_moved: u64,
    /// Announced size
    pub total_size: u64,
    /// Chunks moved so far
    pub chunks: u64,
    /// Size of the most recent chunk
    pub last_chunk: usize,
    /// When the transfer started
    pub started_at: Instant,
}

impl TransferProgress {
    /// Create a new progress tracker.
    #[must_use]
    pub fn new(direction: TransferDirection, total_size: u64) -> Self {
        Self {
            direction,
            bytes_moved: 0,
            total_size,
            chunks: 0,
            last_chunk: 0,
            started_at: Instant::now(),
        }
    }

    /// Progress as a percentage rounded to two decimals.
    ///
    /// Reads 100.0 only once every byte has moved; an unfinished transfer
    /// that would round up to 100 is held at 99.99.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 || self.bytes_moved >= self.total_size {
            return 100.0;
        }
        let exact = self.bytes_moved as f64 * 100.0 / self.total_size as f64;
        let rounded = (exact * 100.0).round() / 100.0;
        rounded.min(99.99)
    }

    /// Whether every announced byte has moved.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_moved >= self.total_size
    }

    /// Time since the transfer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn record(&mut self, chunk: usize) {
        self.bytes_moved += chunk as u64;
        self.chunks += 1;
        self.last_chunk = chunk;
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            bytes_moved: self.bytes_moved,
            chunks: self.chunks,
            elapsed: self.elapsed(),
        }
    }

    fn incomplete(&self) -> Error {
        Error::Protocol(ProtocolError::Incomplete {
            expected: self.total_size,
            moved: self.bytes_moved,
        })
    }
}

/// What a finished transfer moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Bytes moved, always equal to the announced size on success
    pub bytes_moved: u64,
    /// Number of chunks
    pub chunks: u64,
    /// Wall-clock time spent moving bytes
    pub elapsed: Duration,
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Read from `source` until `buf` is full or the source is exhausted.
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Stream `total_size` bytes from `source` to `stream`.
///
/// Every chunk but the last is exactly `chunk_size` bytes.
///
/// # Errors
///
/// Returns `Incomplete` if `source` runs dry before `total_size` bytes, and
/// any I/O error from either side.
pub async fn send_file<W, R, F>(
    stream: &mut W,
    source: &mut R,
    total_size: u64,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<TransferSummary>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    F: FnMut(&TransferProgress),
{
    check_chunk_size(chunk_size)?;

    let mut progress = TransferProgress::new(TransferDirection::Send, total_size);
    if total_size == 0 {
        return Ok(progress.summary());
    }

    let mut buf = vec![0u8; chunk_size];
    while !progress.is_complete() {
        let remaining = total_size - progress.bytes_moved;
        let want = usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size));

        let n = fill_chunk(source, &mut buf[..want]).await?;
        if n == 0 {
            stream.flush().await?;
            return Err(progress.incomplete());
        }

        stream.write_all(&buf[..n]).await?;
        progress.record(n);

        tracing::trace!(
            "Sent chunk {} ({} bytes), {}% complete",
            progress.chunks,
            n,
            progress.percentage()
        );
        on_progress(&progress);
    }

    stream.flush().await?;
    Ok(progress.summary())
}

/// Stream `total_size` bytes from `stream` into `sink`, in the order received.
///
/// A single read may return less than a chunk; each read is appended as it
/// arrives. The sink is flushed before returning, also on failure, so a
/// partial file keeps what did arrive.
///
/// # Errors
///
/// Returns `Incomplete` if the stream closes before `total_size` bytes.
pub async fn receive_file<R, W, F>(
    stream: &mut R,
    sink: &mut W,
    total_size: u64,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<TransferSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&TransferProgress),
{
    check_chunk_size(chunk_size)?;

    let mut progress = TransferProgress::new(TransferDirection::Receive, total_size);
    if total_size == 0 {
        sink.flush().await?;
        return Ok(progress.summary());
    }

    let mut buf = vec![0u8; chunk_size];
    while !progress.is_complete() {
        let remaining = total_size - progress.bytes_moved;
        let want = usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size));

        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            sink.flush().await?;
            return Err(progress.incomplete());
        }

        sink.write_all(&buf[..n]).await?;
        progress.record(n);

        tracing::trace!(
            "Received chunk {} ({} bytes), {}% complete",
            progress.chunks,
            n,
            progress.percentage()
        );
        on_progress(&progress);
    }

    sink.flush().await?;
    Ok(progress.summary())
}

/// A stream whose reads fail with [`io::ErrorKind::TimedOut`] once nothing
/// has arrived for `limit`.
///
/// The deadline restarts every time a read completes, so a slow but steady
/// peer is never cut off; only a stalled one is. Writes pass straight
/// through.
pub struct StallTimeout<S> {
    inner: S,
    limit: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<S> StallTimeout<S> {
    /// Wrap `inner`; the first read must make progress within `limit`.
    pub fn new(inner: S, limit: Duration) -> Self {
        Self {
            inner,
            limit,
            deadline: Box::pin(tokio::time::sleep(limit)),
        }
    }

    /// The configured limit.
    pub const fn limit(&self) -> Duration {
        self.limit
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for StallTimeout<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                let next = tokio::time::Instant::now() + this.limit;
                this.deadline.as_mut().reset(next);
                Poll::Ready(result)
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received for {:?}", this.limit),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for StallTimeout<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
