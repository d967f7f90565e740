//! Byte streams over message-oriented transports.
//!
//! A [`NetworkStream`] is a bidirectional byte stream shared by one reader
//! task and one writer task. [`WebSocketStream`] adapts a WebSocket
//! connection to a relay, and [`relay`] forwards local TCP clients through
//! such connections.

pub mod stream;
pub mod exclusive;
pub mod websocket;
pub mod buffered;
pub mod port_finder;
pub mod relay;

pub use stream::{CloseStatus, ConnectionStatistics, NetworkStream, StreamError};
pub use exclusive::{RawReader, RawWriter, SingleReaderSingleWriterStream};
pub use websocket::{classify, ErrorClass, WebSocketStream};
pub use buffered::BufferedNetworkStream;
pub use port_finder::{find_free_local_port, PortFinderError};
pub use relay::{connect, forward, Destination, RelayListener, StreamConnector, TunnelEndpoint, WebSocketConnector};
