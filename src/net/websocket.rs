//! [`NetworkStream`] over a WebSocket connection.
//!
//! Each `write` sends one binary message and each `read` delivers one
//! message, so a read buffer must be large enough for the largest message
//! the peer sends (see [`NetworkStream::min_read_size`]). Close frames and
//! transport failures are translated into [`StreamError`] here and nowhere
//! else.

use std::error::Error;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::exclusive::{RawReader, RawWriter, SingleReaderSingleWriterStream};
use super::stream::{
    CloseStatus, ConnectionStatistics, NetworkStream, StreamError, NO_STATUS_RECEIVED,
};

/// Outcome of inspecting a transport error and its causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// This side already closed the connection.
    ClientClosed,
    /// The peer closed the connection or it went away.
    ServerClosed(CloseStatus),
    /// An incoming message exceeded the configured size.
    Overflow { capacity: usize, received: usize },
    /// Anything else; fatal for the connection.
    Transport,
}

/// Classify a transport error by walking its whole cause chain, including
/// errors wrapped inside an `io::Error`.
pub fn classify(error: &(dyn Error + 'static)) -> ErrorClass {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(class) = classify_single(err) {
            return class;
        }
        current = err.source();
    }
    ErrorClass::Transport
}

fn classify_single(err: &(dyn Error + 'static)) -> Option<ErrorClass> {
    if let Some(ws) = err.downcast_ref::<WsError>() {
        return match ws {
            WsError::ConnectionClosed => Some(ErrorClass::ServerClosed(CloseStatus::abnormal(
                "connection closed",
            ))),
            WsError::AlreadyClosed => Some(ErrorClass::ServerClosed(CloseStatus::abnormal(
                "connection already closed",
            ))),
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => Some(
                ErrorClass::ServerClosed(CloseStatus::abnormal(
                    "connection reset without closing handshake",
                )),
            ),
            WsError::Protocol(ProtocolError::SendAfterClosing) => Some(ErrorClass::ClientClosed),
            WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                Some(ErrorClass::Overflow {
                    capacity: *max_size,
                    received: *size,
                })
            }
            _ => None,
        };
    }

    if let Some(io_error) = err.downcast_ref::<io::Error>() {
        match io_error.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => {
                return Some(ErrorClass::ServerClosed(CloseStatus::abnormal(
                    io_error.to_string(),
                )));
            }
            _ => {}
        }

        // io::Error::source skips the wrapped error itself
        if let Some(inner) = io_error.get_ref() {
            match classify(inner) {
                ErrorClass::Transport => {}
                class => return Some(class),
            }
        }
    }

    None
}

/// Terminal state shared by both halves of one connection.
#[derive(Debug, Default)]
struct CloseLatch {
    closed_by_client: AtomicBool,
    closed_by_server: OnceLock<CloseStatus>,
}

impl CloseLatch {
    fn verify_open(&self) -> Result<(), StreamError> {
        if self.closed_by_client.load(Ordering::SeqCst) {
            return Err(StreamError::ClosedByClient);
        }
        if let Some(status) = self.closed_by_server.get() {
            return Err(StreamError::ClosedByServer(status.clone()));
        }
        Ok(())
    }

    fn latch_client(&self) {
        self.closed_by_client.store(true, Ordering::SeqCst);
    }

    fn latch_server(&self, status: &CloseStatus) {
        // The first close status observed wins
        let _ = self.closed_by_server.set(status.clone());
    }

    fn translate(&self, error: WsError) -> StreamError {
        // Failures after our own close are reported as such
        if self.closed_by_client.load(Ordering::SeqCst) {
            log::debug!("Transport failed after client close: {}", error);
            return StreamError::ClosedByClient;
        }

        match classify(&error) {
            ErrorClass::ClientClosed => {
                self.latch_client();
                StreamError::ClosedByClient
            }
            ErrorClass::ServerClosed(status) => {
                log::debug!("Connection lost: {}", status);
                self.latch_server(&status);
                StreamError::ClosedByServer(status)
            }
            ErrorClass::Overflow { capacity, received } => {
                StreamError::Overflow { capacity, received }
            }
            ErrorClass::Transport => StreamError::transport(error),
        }
    }
}

/// Receiving half of a WebSocket connection.
pub struct WebSocketReader<S> {
    messages: SplitStream<tokio_tungstenite::WebSocketStream<S>>,
    latch: Arc<CloseLatch>,
    statistics: Arc<ConnectionStatistics>,
}

impl<S> WebSocketReader<S> {
    fn deliver(&self, data: &[u8], buf: &mut [u8]) -> Result<usize, StreamError> {
        if data.len() > buf.len() {
            return Err(StreamError::Overflow {
                capacity: buf.len(),
                received: data.len(),
            });
        }
        buf[..data.len()].copy_from_slice(data);
        self.statistics.on_received(data.len());
        Ok(data.len())
    }
}

#[async_trait]
impl<S> RawReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.latch.verify_open()?;

        // Only reports the latched state, no frame is read
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let message = match self.messages.next().await {
                Some(Ok(message)) => message,
                Some(Err(error)) => return Err(self.latch.translate(error)),
                None if self.latch.closed_by_client.load(Ordering::SeqCst) => {
                    return Err(StreamError::ClosedByClient);
                }
                None => {
                    let status = CloseStatus::abnormal("connection ended without close frame");
                    self.latch.latch_server(&status);
                    return Err(StreamError::ClosedByServer(status));
                }
            };

            match message {
                // An empty message would be indistinguishable from EOF
                Message::Binary(data) if data.is_empty() => continue,
                Message::Text(text) if text.is_empty() => continue,
                Message::Binary(data) => return self.deliver(&data, buf),
                Message::Text(text) => return self.deliver(text.as_bytes(), buf),
                Message::Close(frame) => {
                    let status = match frame {
                        Some(frame) => {
                            CloseStatus::new(u16::from(frame.code), frame.reason.into_owned())
                        }
                        None => CloseStatus::new(NO_STATUS_RECEIVED, ""),
                    };
                    self.latch.latch_server(&status);

                    if status.is_normal() {
                        log::debug!("Connection closed by server");
                        return Ok(0);
                    }
                    log::debug!("Connection closed abnormally by server: {}", status);
                    return Err(StreamError::ClosedByServer(status));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

/// Sending half of a WebSocket connection.
pub struct WebSocketWriter<S> {
    sink: SplitSink<tokio_tungstenite::WebSocketStream<S>, Message>,
    latch: Arc<CloseLatch>,
    statistics: Arc<ConnectionStatistics>,
}

#[async_trait]
impl<S> RawWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        self.latch.verify_open()?;

        match self.sink.send(Message::Binary(buf.to_vec())).await {
            Ok(()) => {
                self.statistics.on_transmitted(buf.len());
                Ok(())
            }
            Err(error) => Err(self.latch.translate(error)),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if self.latch.closed_by_client.swap(true, Ordering::SeqCst) {
            return Err(StreamError::ClosedByClient);
        }

        if let Some(status) = self.latch.closed_by_server.get() {
            // The reply to the server's close frame is queued, not yet written
            log::debug!("Server already closed ({}), flushing close reply", status);
            return match self.sink.flush().await {
                Ok(()) => Ok(()),
                Err(error) => match classify(&error) {
                    ErrorClass::ServerClosed(_) | ErrorClass::ClientClosed => Ok(()),
                    _ => Err(StreamError::transport(error)),
                },
            };
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(error) => match classify(&error) {
                ErrorClass::ServerClosed(_) | ErrorClass::ClientClosed => {
                    log::debug!("Connection already gone while closing: {}", error);
                    Ok(())
                }
                _ => Err(StreamError::transport(error)),
            },
        }
    }
}

/// A WebSocket connection exposed as a [`NetworkStream`].
///
/// Only a socket that completed its handshake can be wrapped, which is
/// what `tokio_tungstenite::WebSocketStream` guarantees. Dropping the
/// stream releases both halves and the underlying socket.
pub struct WebSocketStream<S> {
    inner: SingleReaderSingleWriterStream<WebSocketReader<S>, WebSocketWriter<S>>,
    latch: Arc<CloseLatch>,
    statistics: Arc<ConnectionStatistics>,
}

impl<S> WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open socket. `max_message_size` is the largest message the
    /// peer is expected to send and becomes the stream's minimum read size.
    pub fn new(socket: tokio_tungstenite::WebSocketStream<S>, max_message_size: usize) -> Self {
        let (sink, messages) = socket.split();
        let latch = Arc::new(CloseLatch::default());
        let statistics = Arc::new(ConnectionStatistics::new());

        let reader = WebSocketReader {
            messages,
            latch: latch.clone(),
            statistics: statistics.clone(),
        };
        let writer = WebSocketWriter {
            sink,
            latch: latch.clone(),
            statistics: statistics.clone(),
        };

        Self {
            inner: SingleReaderSingleWriterStream::new(reader, writer, usize::MAX, max_message_size),
            latch,
            statistics,
        }
    }

    pub fn statistics(&self) -> &ConnectionStatistics {
        &self.statistics
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.latch.closed_by_client.load(Ordering::SeqCst)
    }

    /// Close status sent by the server, if it closed the connection.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.latch.closed_by_server.get().cloned()
    }
}

#[async_trait]
impl<S> NetworkStream for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn max_write_size(&self) -> usize {
        self.inner.max_write_size()
    }

    fn min_read_size(&self) -> usize {
        self.inner.min_read_size()
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.inner.read(buf).await
    }

    async fn write(&self, buf: &[u8]) -> Result<(), StreamError> {
        self.inner.write(buf).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::stream::ABNORMAL_CLOSURE;

    #[test]
    fn test_classify_websocket_errors() {
        assert_eq!(
            classify(&WsError::Protocol(ProtocolError::SendAfterClosing)),
            ErrorClass::ClientClosed
        );
        assert!(matches!(
            classify(&WsError::ConnectionClosed),
            ErrorClass::ServerClosed(CloseStatus { code: ABNORMAL_CLOSURE, .. })
        ));
        assert!(matches!(
            classify(&WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            ErrorClass::ServerClosed(_)
        ));
        assert_eq!(
            classify(&WsError::Capacity(CapacityError::MessageTooLong {
                size: 100,
                max_size: 10
            })),
            ErrorClass::Overflow {
                capacity: 10,
                received: 100
            }
        );
        assert_eq!(classify(&WsError::Utf8), ErrorClass::Transport);
    }

    #[test]
    fn test_classify_walks_io_cause_chain() {
        let reset = WsError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert!(matches!(classify(&reset), ErrorClass::ServerClosed(_)));

        // Library error wrapped inside an io::Error of an unrelated kind
        let wrapped = io::Error::new(io::ErrorKind::Other, WsError::AlreadyClosed);
        assert!(matches!(classify(&wrapped), ErrorClass::ServerClosed(_)));

        let unrelated = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify(&unrelated), ErrorClass::Transport);
    }

    #[test]
    fn test_latch_reports_first_server_status() {
        let latch = CloseLatch::default();
        assert!(latch.verify_open().is_ok());

        latch.latch_server(&CloseStatus::new(4003, "not authorized"));
        latch.latch_server(&CloseStatus::abnormal("later"));

        match latch.verify_open() {
            Err(StreamError::ClosedByServer(status)) => assert_eq!(status.code, 4003),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_client_latch_takes_precedence() {
        let latch = CloseLatch::default();
        latch.latch_server(&CloseStatus::new(1000, ""));
        latch.latch_client();
        assert!(matches!(latch.verify_open(), Err(StreamError::ClosedByClient)));
    }
}
