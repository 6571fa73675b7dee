//! Routing decoded calls to handlers.
//!
//! Connection tasks submit [`CallRequest`]s to the shared queue through a
//! [`Dispatcher`]. Worker threads pull them off, run [`execute`] and push the
//! reply back through the request's [`ReplySender`].

use crate::context::{CallContext, Return};
use crate::error::TransportError;
use crate::registry::Registry;
use crate::transport::ConnectionId;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, trace};
use wsrpc_protocol::{CallFrame, CallId, ReplyFrame, RpcError};

/// One call waiting for a worker.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub call_id: CallId,
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
    pub connection_id: ConnectionId,
    pub peer: String,
    pub received_at: Instant,
}

impl CallRequest {
    pub fn from_frame(frame: CallFrame, connection_id: ConnectionId, peer: impl Into<String>) -> Self {
        Self {
            call_id: frame.id,
            service: frame.service,
            method: frame.method,
            args: frame.args,
            connection_id,
            peer: peer.into(),
            received_at: Instant::now(),
        }
    }
}

/// Route back to the connection a call arrived on.
#[derive(Debug, Clone)]
pub struct ReplySender {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<ReplyFrame>,
}

impl ReplySender {
    pub fn new(connection_id: ConnectionId, tx: mpsc::UnboundedSender<ReplyFrame>) -> Self {
        Self { connection_id, tx }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue a reply for the connection's writer. Fails once the
    /// connection has gone away.
    pub fn send(&self, reply: ReplyFrame) -> Result<(), TransportError> {
        self.tx.send(reply).map_err(|_| TransportError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) request: CallRequest,
    pub(crate) reply: ReplySender,
}

#[derive(Debug)]
pub(crate) enum Work {
    Call(Job),
    /// Tells exactly one worker to exit.
    Stop,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Worker queue is closed")]
    QueueClosed,
}

/// Producer side of the worker queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: flume::Sender<Work>,
}

impl Dispatcher {
    pub(crate) fn new(tx: flume::Sender<Work>) -> Self {
        Self { tx }
    }

    /// Enqueue a call. Waits while a bounded queue is full.
    pub async fn submit(&self, request: CallRequest, reply: ReplySender) -> Result<(), DispatchError> {
        self.tx
            .send_async(Work::Call(Job { request, reply }))
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Calls waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Reply produced for one call.
#[derive(Debug)]
pub struct Completion {
    pub reply: Return,
    /// The handler panicked.
    pub faulted: bool,
}

/// Resolve and run one call on the current thread.
///
/// Never panics: a panicking handler yields an `Internal` failure carrying
/// the panic message in `debug`.
pub fn execute(registry: &Registry, request: CallRequest) -> Completion {
    let method = match registry.resolve(&request.service, &request.method) {
        Ok(method) => method,
        Err(e) => {
            trace!("Unresolved call {}.{}: {}", request.service, request.method, e);
            return Completion {
                reply: Return::Failure(e.into()),
                faulted: false,
            };
        }
    };

    let ctx = CallContext::new(&request);
    let target = ctx.target();
    let args = request.args;

    match catch_unwind(AssertUnwindSafe(|| method.invoke(ctx, args))) {
        Ok(reply) => Completion {
            reply,
            faulted: false,
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Handler {} panicked: {}", target, message);
            Completion {
                reply: Return::Failure(
                    RpcError::internal(format!("{} panicked", target)).add_debug(message),
                ),
                faulted: true,
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
