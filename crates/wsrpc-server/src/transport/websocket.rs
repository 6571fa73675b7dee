//! WebSocket transport: one message per frame.

use super::{Accepted, Connection, FrameHalves, FrameSink, FrameSource, TransportListener};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct WebSocketListener {
    address: String,
    max_frame_bytes: Option<usize>,
    listener: OnceLock<TcpListener>,
    stop: CancellationToken,
}

impl WebSocketListener {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_frame_bytes: None,
            listener: OnceLock::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Reject inbound messages larger than `limit` bytes.
    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = Some(limit);
        self
    }

    fn config(&self) -> WebSocketConfig {
        let config = WebSocketConfig::default();
        match self.max_frame_bytes {
            Some(limit) => config.max_message_size(Some(limit)).max_frame_size(Some(limit)),
            None => config,
        }
    }
}

#[async_trait]
impl TransportListener for WebSocketListener {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn listen(&self) -> Result<SocketAddr, TransportError> {
        if let Some(listener) = self.listener.get() {
            return Ok(listener.local_addr()?);
        }

        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| TransportError::Bind {
                address: self.address.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        // A concurrent bind that won the race keeps its socket.
        let _ = self.listener.set(listener);
        info!("WebSocket transport listening on {}", local);
        Ok(local)
    }

    async fn accept(&self) -> Result<Accepted, TransportError> {
        let listener = self.listener.get().ok_or(TransportError::NotListening)?;

        tokio::select! {
            _ = self.stop.cancelled() => Ok(Accepted::Stopped),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("WebSocket connection from {}", peer);
                Ok(Accepted::Connection(Box::new(WebSocketConnection {
                    stream,
                    peer,
                    config: self.config(),
                })))
            }
        }
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

struct WebSocketConnection {
    stream: TcpStream,
    peer: SocketAddr,
    config: WebSocketConfig,
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn open(self: Box<Self>) -> Result<FrameHalves, TransportError> {
        let ws = tokio_tungstenite::accept_async_with_config(self.stream, Some(self.config))
            .await
            .map_err(map_ws_error)?;
        let (sink, stream) = ws.split();
        Ok(FrameHalves {
            source: Box::new(WebSocketSource { stream }),
            sink: Box::new(WebSocketSink { sink }),
        })
    }
}

struct WebSocketSource {
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return match map_ws_error(e) {
                        TransportError::ConnectionClosed => None,
                        other => Some(Err(other)),
                    };
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Message::Binary(data) => return Some(Ok(data.to_vec())),
                Message::Close(_) => return None,
                // Ping/pong are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

struct WebSocketSink {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.sink.send(message).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(map_ws_error)
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            TransportError::FrameTooLarge {
                size,
                limit: max_size,
            }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_before_listen_fails() {
        let listener = WebSocketListener::new("127.0.0.1:0");
        assert!(matches!(
            listener.accept().await,
            Err(TransportError::NotListening)
        ));
    }

    #[tokio::test]
    async fn test_listen_reports_ephemeral_port() {
        let listener = WebSocketListener::new("127.0.0.1:0");
        let addr = listener.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        // Listening twice returns the same socket.
        assert_eq!(listener.listen().await.unwrap(), addr);
    }

    #[tokio::test]
    async fn test_stop_unblocks_accept() {
        let listener = WebSocketListener::new("127.0.0.1:0");
        listener.listen().await.unwrap();
        listener.stop();
        assert!(matches!(listener.accept().await, Ok(Accepted::Stopped)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = WebSocketListener::new("127.0.0.1:0");
        let addr = first.listen().await.unwrap();

        let second = WebSocketListener::new(addr.to_string());
        let err = second.listen().await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
