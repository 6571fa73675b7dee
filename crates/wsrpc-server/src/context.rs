//! Per-call context handed to handlers, and the [`Return`] they produce.

use crate::dispatcher::CallRequest;
use crate::transport::ConnectionId;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use wsrpc_protocol::{CallId, ErrorKind, ReplyFrame, RpcError, TARGET_SEPARATOR};

/// Handle a handler uses to produce its result.
///
/// [`ok`](Self::ok) and [`error`](Self::error) consume the context, so a
/// handler produces exactly one [`Return`] per invocation.
#[derive(Debug)]
pub struct CallContext {
    call_id: CallId,
    service: String,
    method: String,
    connection_id: ConnectionId,
    peer: String,
    received_at: Instant,
}

impl CallContext {
    pub(crate) fn new(request: &CallRequest) -> Self {
        Self {
            call_id: request.call_id,
            service: request.service.clone(),
            method: request.method.clone(),
            connection_id: request.connection_id,
            peer: request.peer.clone(),
            received_at: request.received_at,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// `service.method`
    pub fn target(&self) -> String {
        format!("{}{}{}", self.service, TARGET_SEPARATOR, self.method)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Remote address of the caller as reported by the transport.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Time since the frame carrying this call was decoded.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Finish the call successfully.
    pub fn ok(self, payload: impl Into<Value>) -> Return {
        Return::Success(payload.into())
    }

    /// Finish the call with any serializable payload.
    pub fn ok_json<T: Serialize>(self, payload: &T) -> Return {
        match serde_json::to_value(payload) {
            Ok(value) => Return::Success(value),
            Err(e) => Return::Failure(
                RpcError::internal(format!("{}: failed to serialize result", self.target()))
                    .add_debug(e.to_string()),
            ),
        }
    }

    /// Finish the call with an error.
    pub fn error(self, kind: ErrorKind, message: impl Into<String>) -> Return {
        Return::Failure(RpcError::new(kind, message))
    }
}

/// Outcome of one call.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Return {
    Success(Value),
    Failure(RpcError),
}

impl Return {
    pub fn is_success(&self) -> bool {
        matches!(self, Return::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Return::Success(value) => Some(value),
            Return::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Return::Success(_) => None,
            Return::Failure(err) => Some(err),
        }
    }

    pub fn into_reply(self, call_id: CallId) -> ReplyFrame {
        match self {
            Return::Success(value) => ReplyFrame::success(call_id, value),
            Return::Failure(err) => ReplyFrame::failure(Some(call_id), err),
        }
    }
}

impl From<RpcError> for Return {
    fn from(err: RpcError) -> Self {
        Return::Failure(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wsrpc_protocol::CallFrame;

    fn context() -> CallContext {
        let frame = CallFrame::new(11, "user", "SayHello", vec![json!("Ann")]);
        CallContext::new(&CallRequest::from_frame(frame, ConnectionId::new(), "127.0.0.1:5000"))
    }

    #[test]
    fn test_ok_wraps_payload() {
        let ret = context().ok("hello Ann");
        assert_eq!(ret, Return::Success(json!("hello Ann")));
        assert_eq!(ret.payload(), Some(&json!("hello Ann")));
    }

    #[test]
    fn test_error_carries_kind_and_message() {
        let ret = context().error(ErrorKind::Reply, "user is blocked");
        let err = ret.error().unwrap();
        assert_eq!(err.kind, ErrorKind::Reply);
        assert_eq!(err.message, "user is blocked");
    }

    #[test]
    fn test_ok_json_serializes_structs() {
        #[derive(Serialize)]
        struct Greeting {
            text: &'static str,
        }
        let ret = context().ok_json(&Greeting { text: "hi" });
        assert_eq!(ret, Return::Success(json!({ "text": "hi" })));
    }

    #[test]
    fn test_metadata() {
        let ctx = context();
        assert_eq!(ctx.call_id(), 11);
        assert_eq!(ctx.target(), "user.SayHello");
        assert_eq!(ctx.peer(), "127.0.0.1:5000");
    }

    #[test]
    fn test_into_reply_keeps_call_id() {
        let reply = context().ok(1).into_reply(11);
        assert_eq!(reply.id, Some(11));
        assert_eq!(reply.result, Some(json!(1)));
    }
}
