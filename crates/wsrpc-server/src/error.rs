//! Error types for registration, resolution, transports and serving.

use thiserror::Error;
use wsrpc_protocol::{ErrorKind, RpcError};

/// Errors raised while configuring a server. Fatal to that configuration
/// step only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A method with this name already exists on the service.
    #[error("Method '{0}' is already registered on this service")]
    DuplicateMethod(String),

    /// A service is already registered at this path.
    #[error("Service path '{0}' is already registered")]
    DuplicatePath(String),

    /// Empty path or path containing a reserved character.
    #[error("Invalid service path: {0:?}")]
    InvalidPath(String),

    /// Empty method name or name containing a reserved character.
    #[error("Invalid method name: {0:?}")]
    InvalidMethodName(String),

    /// Server configuration value out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server has already started serving.
    #[error("Server is already serving")]
    AlreadyServing,
}

/// Errors looking up a call target. Recovered per call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },
}

impl ResolutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolutionError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            ResolutionError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
        }
    }
}

impl From<ResolutionError> for RpcError {
    fn from(err: ResolutionError) -> Self {
        RpcError::new(err.kind(), err.to_string())
    }
}

/// Transport failures. `Bind` is fatal at startup; everything else only
/// affects the connection it happened on.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Listener is not bound")]
    NotListening,

    #[error("Failed to encode reply: {0}")]
    Encode(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
            other => TransportError::WebSocket(Box::new(other)),
        }
    }
}

/// Errors returned from [`Server::serve`](crate::Server::serve).
#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to start worker pool: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Result type for server configuration calls.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_maps_to_wire_kind() {
        let err: RpcError = ResolutionError::ServiceNotFound("admin".into()).into();
        assert_eq!(err.kind, ErrorKind::ServiceNotFound);
        assert_eq!(err.message, "Service 'admin' not found");

        let err: RpcError = ResolutionError::MethodNotFound {
            service: "user".into(),
            method: "Goodbye".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::MethodNotFound);
    }

    #[test]
    fn test_closed_websocket_maps_to_connection_closed() {
        let err: TransportError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
