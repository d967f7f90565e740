//! Read-filling decorator.

use async_trait::async_trait;

use super::stream::{NetworkStream, StreamError};

/// Wraps a stream so that `read` keeps reading until the whole buffer is
/// filled or the inner stream reports EOF. Writes and closes pass through.
pub struct BufferedNetworkStream<S> {
    inner: S,
}

impl<S: NetworkStream> BufferedNetworkStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: NetworkStream> NetworkStream for BufferedNetworkStream<S> {
    fn max_write_size(&self) -> usize {
        self.inner.max_write_size()
    }

    fn min_read_size(&self) -> usize {
        self.inner.min_read_size()
    }

    /// Returns fewer bytes than requested only if the inner stream hit EOF.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.inner.read(&mut buf[filled..]).await?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        Ok(filled)
    }

    async fn write(&self, buf: &[u8]) -> Result<(), StreamError> {
        self.inner.write(buf).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.inner.close().await
    }
}
