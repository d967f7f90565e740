//! Relay connections and local port forwarding.
//!
//! A [`RelayListener`] accepts local TCP clients and gives each one its own
//! relay stream, pumping bytes both ways until either side closes.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::MaybeTlsStream;
use tokio_util::sync::CancellationToken;

use super::port_finder;
use super::stream::{NetworkStream, StreamError};
use super::websocket::WebSocketStream;

/// Largest message the relay sends unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Upper bound on a single write from the local socket to the relay.
const UPLINK_CHUNK_SIZE: usize = 16 * 1024;

/// Host and port the relay should connect to on our behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

/// Everything needed to open one relay connection.
#[derive(Debug, Clone)]
pub struct TunnelEndpoint {
    pub relay_url: String,
    pub destination: Destination,
    pub max_message_size: usize,
    pub connect_timeout: Duration,
}

impl TunnelEndpoint {
    /// Relay URL with the destination appended as query parameters.
    pub fn connect_url(&self) -> String {
        let separator = if self.relay_url.contains('?') { '&' } else { '?' };
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("host", &self.destination.host)
            .append_pair("port", &self.destination.port.to_string())
            .finish();
        format!("{}{}{}", self.relay_url, separator, query)
    }
}

/// Open a WebSocket connection to the relay for `endpoint`.
pub async fn connect(
    endpoint: &TunnelEndpoint,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, StreamError> {
    let url = endpoint.connect_url();
    log::debug!("Connecting to relay: {}", url);

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(endpoint.max_message_size);
    config.max_frame_size = Some(endpoint.max_message_size);

    let connecting = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), true);
    let (socket, response) = match tokio::time::timeout(endpoint.connect_timeout, connecting).await {
        Ok(result) => result.map_err(StreamError::transport)?,
        Err(elapsed) => return Err(StreamError::transport(elapsed)),
    };

    log::info!(
        "Connected to relay for {}:{} (HTTP {})",
        endpoint.destination.host,
        endpoint.destination.port,
        response.status()
    );
    Ok(WebSocketStream::new(socket, endpoint.max_message_size))
}

/// Opens a fresh stream for each forwarded client.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    type Stream: NetworkStream + 'static;

    async fn connect(&self) -> Result<Self::Stream, StreamError>;
}

/// Connects to a relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    pub endpoint: TunnelEndpoint,
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> Result<Self::Stream, StreamError> {
        connect(&self.endpoint).await
    }
}

/// Bytes moved by one forwarded connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub bytes_to_relay: u64,
    pub bytes_from_relay: u64,
}

/// Pump bytes between a local socket and a relay stream.
///
/// Local EOF closes the stream; stream EOF shuts down the local write half.
/// Graceful closes end a direction quietly, anything else is returned.
pub async fn forward<S>(socket: TcpStream, stream: Arc<S>) -> Result<ForwardSummary, StreamError>
where
    S: NetworkStream + ?Sized,
{
    let (mut local_reader, mut local_writer) = socket.into_split();

    let uplink = async {
        let mut buf = vec![0u8; UPLINK_CHUNK_SIZE.min(stream.max_write_size()).max(1)];
        let mut total = 0u64;
        loop {
            let count = local_reader.read(&mut buf).await.map_err(StreamError::transport)?;
            if count == 0 {
                match stream.close().await {
                    Err(e) if !e.is_graceful_close() => return Err(e),
                    _ => return Ok(total),
                }
            }
            match stream.write(&buf[..count]).await {
                Ok(()) => total += count as u64,
                Err(e) if e.is_graceful_close() => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    };

    let downlink = async {
        let mut buf = vec![0u8; stream.min_read_size().max(1)];
        let mut total = 0u64;
        loop {
            let count = match stream.read(&mut buf).await {
                Ok(count) => count,
                Err(e) if e.is_graceful_close() => 0,
                Err(e) => return Err(e),
            };
            if count == 0 {
                local_writer.shutdown().await.map_err(StreamError::transport)?;
                return Ok(total);
            }
            local_writer
                .write_all(&buf[..count])
                .await
                .map_err(StreamError::transport)?;
            total += count as u64;
        }
    };

    let (bytes_to_relay, bytes_from_relay) = tokio::try_join!(uplink, downlink)?;
    Ok(ForwardSummary {
        bytes_to_relay,
        bytes_from_relay,
    })
}

/// Local listener forwarding each accepted client through its own stream.
pub struct RelayListener<C> {
    listener: TcpListener,
    connector: Arc<C>,
}

impl<C: StreamConnector> RelayListener<C> {
    /// Bind to `127.0.0.1:port`, or to a free port when `port` is `None`.
    pub async fn bind(port: Option<u16>, connector: C) -> color_eyre::Result<Self> {
        let port = match port {
            Some(port) => port,
            None => port_finder::find_free_local_port()?,
        };
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        log::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            connector: Arc::new(connector),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> color_eyre::Result<()> {
        loop {
            let (socket, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Relay listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };

            log::info!("Accepted local client {}", peer);
            let connector = self.connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let stream = match connector.connect().await {
                    Ok(stream) => Arc::new(stream),
                    Err(e) => {
                        log::error!("Failed to connect relay for {}: {}", peer, e);
                        return;
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = stream.close().await {
                            if !e.is_graceful_close() {
                                log::debug!("Closing relay stream for {} failed: {}", peer, e);
                            }
                        }
                    }
                    result = forward(socket, stream.clone()) => match result {
                        Ok(summary) => log::info!(
                            "Closed client {} ({} bytes sent, {} bytes received)",
                            peer,
                            summary.bytes_to_relay,
                            summary.bytes_from_relay
                        ),
                        Err(e) => log::warn!("Forwarding for {} failed: {}", peer, e),
                    },
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> TunnelEndpoint {
        TunnelEndpoint {
            relay_url: url.to_string(),
            destination: Destination {
                host: "10.0.0.2".to_string(),
                port: 22,
            },
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_connect_url() {
        assert_eq!(
            endpoint("wss://relay.example.com/v4/connect").connect_url(),
            "wss://relay.example.com/v4/connect?host=10.0.0.2&port=22"
        );
        assert_eq!(
            endpoint("wss://relay.example.com/connect?zone=a").connect_url(),
            "wss://relay.example.com/connect?zone=a&host=10.0.0.2&port=22"
        );
    }

    #[test]
    fn test_connect_url_escapes_host() {
        let mut endpoint = endpoint("wss://relay.example.com/connect");
        endpoint.destination.host = "a&b#c d".to_string();
        assert_eq!(
            endpoint.connect_url(),
            "wss://relay.example.com/connect?host=a%26b%23c+d&port=22"
        );
    }

    #[tokio::test]
    async fn test_connect_fails_without_relay() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect(&endpoint(&format!("ws://127.0.0.1:{}/connect", port))).await;
        assert!(matches!(result, Err(StreamError::Transport(_))));
    }
}
