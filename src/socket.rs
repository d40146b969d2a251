//! Socket transport seam
//!
//! The connection manager talks to the wire through the object-safe
//! [`SocketConnector`] / [`Socket`] traits so tests can substitute a scripted
//! transport. The production implementation wraps tokio-tungstenite with a
//! dial timeout and TCP_NODELAY on plain streams.

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

/// Errors that can occur on the socket transport
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Connection closed")]
    Closed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SocketError>;

/// Dials a socket. One connector serves the whole process; each dial
/// produces a fresh [`Socket`].
pub trait SocketConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Box<dyn Socket>>>;
}

/// An open bidirectional text-frame socket
pub trait Socket: Send + 'static {
    /// Split into independently owned write and read halves
    fn split(self: Box<Self>) -> (Box<dyn SocketSink>, Box<dyn SocketStream>);
}

/// Write half of a socket
pub trait SocketSink: Send + 'static {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>>;
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Read half of a socket
///
/// `None` means the peer closed the connection gracefully; `Some(Err(..))`
/// means it dropped. Either way the manager treats it as a close event.
pub trait SocketStream: Send + 'static {
    fn next_text(&mut self) -> BoxFuture<'_, Option<Result<String>>>;
}

/// Production connector over tokio-tungstenite
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl SocketConnector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Box<dyn Socket>>> {
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let (ws_stream, _) = timeout(connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| SocketError::Timeout)?
                .map_err(|e| SocketError::ConnectionFailed(e.to_string()))?;

            // Send frames immediately; the protocol is chatty but tiny
            if let MaybeTlsStream::Plain(ref tcp) = ws_stream.get_ref() {
                optimize_tcp_stream(tcp)?;
            }

            Ok(Box::new(WsSocket { stream: ws_stream }) as Box<dyn Socket>)
        })
    }
}

/// Disable Nagle's algorithm on the underlying TCP stream
fn optimize_tcp_stream(stream: &TcpStream) -> Result<()> {
    stream
        .set_nodelay(true)
        .map_err(|e| SocketError::ConnectionFailed(e.to_string()))?;
    Ok(())
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Socket for WsSocket {
    fn split(self: Box<Self>) -> (Box<dyn SocketSink>, Box<dyn SocketStream>) {
        let (sink, stream) = self.stream.split();
        (Box::new(WsSink { sink }), Box::new(WsStream { stream }))
    }
}

struct WsSink {
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
}

impl SocketSink for WsSink {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink
                .send(Message::text(text))
                .await
                .map_err(|e| SocketError::SendFailed(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.sink.close().await;
        })
    }
}

struct WsStream {
    stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl SocketStream for WsStream {
    fn next_text(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                    // tungstenite answers pings itself; pongs carry no payload
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Err(e)) => return Some(Err(SocketError::ReceiveFailed(e.to_string()))),
                }
            }
        })
    }
}
