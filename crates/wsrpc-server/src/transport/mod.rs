//! Pluggable transports.
//!
//! A transport binds an address, accepts connections and moves whole frames
//! in both directions. Framing is the transport's business: WebSocket uses
//! one message per frame, [`TcpLineListener`] one line per frame. Frame
//! bytes are always the JSON wire encoding from `wsrpc_protocol::codec`.

mod tcp;
mod websocket;

pub use tcp::TcpLineListener;
pub use websocket::WebSocketListener;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use wsrpc_protocol::{codec, CallFrame, ReplyFrame};

/// Inbound frames larger than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Built-in transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(rename = "websocket", alias = "ws")]
    WebSocket,
    Tcp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of waiting for the next connection.
pub enum Accepted {
    Connection(Box<dyn Connection>),
    /// The listener was stopped; no more connections will arrive.
    Stopped,
}

/// A bound (or bindable) endpoint that produces connections.
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    /// Short transport name for logs.
    fn kind(&self) -> &'static str;

    /// Configured address, as given by the user.
    fn address(&self) -> &str;

    /// Bind the address. Returns the actual local address, which differs
    /// from the configured one when port 0 was requested.
    async fn listen(&self) -> Result<SocketAddr, TransportError>;

    /// Wait for the next connection. Returns [`Accepted::Stopped`] once
    /// [`stop`](Self::stop) has been called.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Stop accepting. Connections already accepted are unaffected.
    fn stop(&self);

    /// Decode one inbound frame.
    fn decode(&self, frame: &[u8]) -> Result<CallFrame, TransportError> {
        codec::decode_call(frame).map_err(|e| TransportError::MalformedFrame(e.to_string()))
    }

    /// Encode one outbound reply.
    fn encode(&self, reply: &ReplyFrame) -> Result<Vec<u8>, TransportError> {
        codec::encode_reply(reply).map_err(|e| TransportError::Encode(e.to_string()))
    }
}

/// An accepted connection that has not completed its handshake yet.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Remote address.
    fn peer(&self) -> String;

    /// Finish any handshake and split into independent read/write halves.
    async fn open(self: Box<Self>) -> Result<FrameHalves, TransportError>;
}

pub struct FrameHalves {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

/// Read half: yields whole frames until the peer goes away.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// `None` once the connection has closed cleanly.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}

/// Write half.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connection_ids_are_unique() {
        let ids: HashSet<ConnectionId> = (0..100).map(|_| ConnectionId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), format!("conn-{}", id.as_u64()));
    }

    #[test]
    fn test_transport_kind_serde() {
        let kind: TransportKind = serde_json::from_str("\"websocket\"").unwrap();
        assert_eq!(kind, TransportKind::WebSocket);
        let kind: TransportKind = serde_json::from_str("\"ws\"").unwrap();
        assert_eq!(kind, TransportKind::WebSocket);
        let kind: TransportKind = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(kind, TransportKind::Tcp);
        assert_eq!(serde_json::to_string(&TransportKind::Tcp).unwrap(), "\"tcp\"");
    }
}
