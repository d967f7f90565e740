//! Single-reader/single-writer envelope around raw transport halves.
//!
//! At most one read and one write-or-close are in flight at any time.
//! Concurrent callers of the same kind wait for the operation in progress.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::stream::{NetworkStream, StreamError};

/// Read half of a transport.
#[async_trait]
pub trait RawReader: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;
}

/// Write half of a transport. Writes and closes share this half so that a
/// close cannot race an in-flight write.
#[async_trait]
pub trait RawWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<(), StreamError>;

    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Serializes reads against reads and writes/closes against writes/closes.
///
/// The guard is released when the operation returns, fails, or its future
/// is dropped, so an error or a cancellation never leaks the permit.
pub struct SingleReaderSingleWriterStream<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    max_write_size: usize,
    min_read_size: usize,
}

impl<R, W> SingleReaderSingleWriterStream<R, W>
where
    R: RawReader,
    W: RawWriter,
{
    pub fn new(reader: R, writer: W, max_write_size: usize, min_read_size: usize) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_write_size,
            min_read_size,
        }
    }
}

#[async_trait]
impl<R, W> NetworkStream for SingleReaderSingleWriterStream<R, W>
where
    R: RawReader,
    W: RawWriter,
{
    fn max_write_size(&self) -> usize {
        self.max_write_size
    }

    fn min_read_size(&self) -> usize {
        self.min_read_size
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut reader = self.reader.lock().await;
        reader.read(buf).await
    }

    async fn write(&self, buf: &[u8]) -> Result<(), StreamError> {
        let mut writer = self.writer.lock().await;
        writer.write(buf).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Tracks how many operations of one kind are inside the raw half at once.
    #[derive(Default)]
    struct Occupancy {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Occupancy {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct SlowReader {
        occupancy: Arc<Occupancy>,
        fill: u8,
    }

    #[async_trait]
    impl RawReader for SlowReader {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
            self.occupancy.enter();
            for byte in buf.iter_mut() {
                *byte = self.fill;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            self.fill += 1;
            self.occupancy.leave();
            Ok(buf.len())
        }
    }

    struct SlowWriter {
        occupancy: Arc<Occupancy>,
        fail_writes: bool,
    }

    #[async_trait]
    impl RawWriter for SlowWriter {
        async fn write(&mut self, _buf: &[u8]) -> Result<(), StreamError> {
            self.occupancy.enter();
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.occupancy.leave();
            if self.fail_writes {
                Err(StreamError::ClosedByClient)
            } else {
                Ok(())
            }
        }

        async fn close(&mut self) -> Result<(), StreamError> {
            self.occupancy.enter();
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.occupancy.leave();
            Ok(())
        }
    }

    fn stream(
        fail_writes: bool,
    ) -> (
        Arc<SingleReaderSingleWriterStream<SlowReader, SlowWriter>>,
        Arc<Occupancy>,
        Arc<Occupancy>,
    ) {
        let reads = Arc::new(Occupancy::default());
        let writes = Arc::new(Occupancy::default());
        let stream = SingleReaderSingleWriterStream::new(
            SlowReader {
                occupancy: reads.clone(),
                fill: 1,
            },
            SlowWriter {
                occupancy: writes.clone(),
                fail_writes,
            },
            usize::MAX,
            16,
        );
        (Arc::new(stream), reads, writes)
    }

    #[tokio::test]
    async fn test_concurrent_reads_are_serialized() {
        let (stream, reads, _) = stream(false);

        let first = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8];
                stream.read(&mut buf).await.map(|_| buf)
            })
        };
        let second = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8];
                stream.read(&mut buf).await.map(|_| buf)
            })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(reads.peak.load(Ordering::SeqCst), 1);
        // Each buffer is filled by exactly one read, never interleaved
        assert!(first.iter().all(|b| *b == first[0]));
        assert!(second.iter().all(|b| *b == second[0]));
        assert_ne!(first[0], second[0]);
    }

    #[tokio::test]
    async fn test_write_and_close_share_one_permit() {
        let (stream, _, writes) = stream(false);

        let writer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.write(b"data").await })
        };
        let closer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.close().await })
        };

        writer.await.unwrap().unwrap();
        closer.await.unwrap().unwrap();
        assert_eq!(writes.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_and_write_run_concurrently() {
        let (stream, reads, writes) = stream(false);

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 20];
                stream.read(&mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(2)).await;
        stream.write(b"x").await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), 20);
        assert_eq!(reads.peak.load(Ordering::SeqCst), 1);
        assert_eq!(writes.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_write_releases_permit() {
        let (stream, _, _) = stream(true);

        assert!(matches!(stream.write(b"a").await, Err(StreamError::ClosedByClient)));
        // A leaked permit would block this call forever
        let second = tokio::time::timeout(Duration::from_secs(1), stream.write(b"b")).await;
        assert!(matches!(second, Ok(Err(StreamError::ClosedByClient))));
    }

    #[tokio::test]
    async fn test_cancelled_read_releases_permit() {
        let (stream, _, _) = stream(false);

        let mut buf = vec![0u8; 1000];
        let cancelled = tokio::time::timeout(Duration::from_millis(5), stream.read(&mut buf)).await;
        assert!(cancelled.is_err());

        let mut small = vec![0u8; 2];
        let read = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut small)).await;
        assert_eq!(read.unwrap().unwrap(), 2);
    }
}
