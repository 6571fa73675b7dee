//! Call and reply frame types
//!
//! Uses serde for serialization so transports can swap the byte encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Caller-assigned identifier used to match a reply to its call.
pub type CallId = u64;

/// Separator between service path and method name in a call target.
pub const TARGET_SEPARATOR: char = '.';

/// A single remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub id: CallId,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallFrame {
    pub fn new(
        id: CallId,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id,
            service: service.into(),
            method: method.into(),
            args,
        }
    }

    /// `service.method`, as used in logs.
    pub fn target(&self) -> String {
        format!("{}{}{}", self.service, TARGET_SEPARATOR, self.method)
    }
}

/// The answer to one [`CallFrame`].
///
/// `id` is `None` only when the server could not read the call at all
/// (malformed frame), so there is nothing to echo back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: Option<CallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ReplyFrame {
    pub fn success(id: CallId, result: impl Into<Value>) -> Self {
        Self {
            id: Some(id),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failure(id: Option<CallId>, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the call outcome.
    ///
    /// A reply without an error is a success; a missing result means the
    /// handler returned `null` (serde folds `"result": null` into `None`).
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error categories carried in a failed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The frame could not be decoded.
    Protocol,
    /// The connection or transport failed.
    Transport,
    /// Returned by a handler through `CallContext::error`.
    Reply,
    /// The call's arguments do not match the method's parameters.
    ArgumentMismatch,
    ServiceNotFound,
    MethodNotFound,
    /// The handler faulted; the server kept running.
    Internal,
    /// A configured limit (frame size, queue) was exceeded.
    SecurityLimit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Protocol => "Protocol",
            ErrorKind::Transport => "Transport",
            ErrorKind::Reply => "Reply",
            ErrorKind::ArgumentMismatch => "ArgumentMismatch",
            ErrorKind::ServiceNotFound => "ServiceNotFound",
            ErrorKind::MethodNotFound => "MethodNotFound",
            ErrorKind::Internal => "Internal",
            ErrorKind::SecurityLimit => "SecurityLimit",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    /// Diagnostic detail, one entry per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            debug: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Append a line of diagnostic detail. Empty input is ignored.
    #[must_use]
    pub fn add_debug(mut self, debug: impl AsRef<str>) -> Self {
        let debug = debug.as_ref();
        if debug.is_empty() {
            return self;
        }
        match self.debug {
            Some(ref mut existing) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(debug);
            }
            _ => self.debug = Some(debug.to_string()),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_reply_omits_error() {
        let reply = ReplyFrame::success(7, "hello Ann");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, json!({ "id": 7, "result": "hello Ann" }));
    }

    #[test]
    fn test_failure_reply_shape() {
        let reply = ReplyFrame::failure(
            Some(3),
            RpcError::new(ErrorKind::MethodNotFound, "no such method"),
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            json!({
                "id": 3,
                "error": { "kind": "MethodNotFound", "message": "no such method" }
            })
        );
    }

    #[test]
    fn test_null_result_is_success() {
        let reply: ReplyFrame = serde_json::from_str(r#"{"id":1,"result":null}"#).unwrap();
        assert_eq!(reply.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_add_debug_joins_lines() {
        let err = RpcError::internal("boom")
            .add_debug("first")
            .add_debug("")
            .add_debug("second");
        assert_eq!(err.debug.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_call_target() {
        let call = CallFrame::new(1, "user", "SayHello", vec![json!("Ann")]);
        assert_eq!(call.target(), "user.SayHello");
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::new(ErrorKind::ServiceNotFound, "service 'admin' not found");
        assert_eq!(err.to_string(), "ServiceNotFound: service 'admin' not found");
    }
}
