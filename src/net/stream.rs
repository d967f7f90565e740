//! Byte stream contract shared by every transport.
//!
//! A [`NetworkStream`] reads, writes and closes. Once either party has
//! closed the stream, every further operation fails with an error that
//! names the party that closed it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported for a close frame that carries no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// WebSocket close code used when the connection went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code and description reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub description: String,
}

impl CloseStatus {
    pub fn new(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Status used when the transport reports that the connection is gone.
    pub fn abnormal(description: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, description)
    }

    /// A normal closure, or a close frame without any payload.
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE || self.code == NO_STATUS_RECEIVED
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.description)
        }
    }
}

/// Errors surfaced by [`NetworkStream`] operations.
///
/// None of these are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream was closed by the client")]
    ClosedByClient,

    #[error("Stream was closed by the server: {0}")]
    ClosedByServer(CloseStatus),

    #[error("Incoming message of {received} bytes does not fit into a {capacity} byte buffer")]
    Overflow { capacity: usize, received: usize },

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    pub fn transport(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        StreamError::Transport(Box::new(error))
    }

    /// True for a close initiated by this side or a normal closure by the peer.
    pub fn is_graceful_close(&self) -> bool {
        match self {
            StreamError::ClosedByClient => true,
            StreamError::ClosedByServer(status) => status.is_normal(),
            _ => false,
        }
    }
}

/// Byte counters for one stream, safe to read from any thread.
#[derive(Debug, Default)]
pub struct ConnectionStatistics {
    bytes_received: AtomicU64,
    bytes_transmitted: AtomicU64,
}

impl ConnectionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted.load(Ordering::Relaxed)
    }

    pub(crate) fn on_received(&self, count: usize) {
        self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn on_transmitted(&self, count: usize) {
        self.bytes_transmitted.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// A byte-oriented, closeable stream.
///
/// Receivers are `&self` so that one reader task and one writer task can
/// share a stream through an `Arc`. Futures returned by these methods can
/// be dropped to cancel the operation.
#[async_trait]
pub trait NetworkStream: Send + Sync {
    /// Largest buffer a single `write` call accepts.
    fn max_write_size(&self) -> usize;

    /// Smallest buffer a caller should pass to a non-empty `read`.
    fn min_read_size(&self) -> usize;

    /// Read into `buf`, returning the number of bytes read. Zero means the
    /// peer closed the stream gracefully.
    ///
    /// An empty `buf` does not touch the connection: it fails if a close
    /// has already been observed and returns `Ok(0)` otherwise, so a close
    /// frame still in flight is only seen by the next non-empty read.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write the entire buffer.
    async fn write(&self, buf: &[u8]) -> Result<(), StreamError>;

    /// Close the stream from this side.
    async fn close(&self) -> Result<(), StreamError>;
}
