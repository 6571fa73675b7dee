use std::time::Duration;
use thiserror::Error;
use wsrpc_protocol::{CodecError, RpcError};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error frame.
    #[error("{0}")]
    Rpc(RpcError),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),
}

impl ClientError {
    /// The server-side error, if the call reached a handler or resolver.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            ClientError::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        ClientError::Rpc(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::Closed,
            other => ClientError::WebSocket(Box::new(other)),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
