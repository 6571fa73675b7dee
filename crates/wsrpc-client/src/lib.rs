//! Client library for wsrpc servers
//!
//! Speaks the JSON call/reply frames over WebSocket. Any number of calls may
//! be in flight on one connection; replies are matched to callers by id.

mod client;
mod error;

pub use client::{reconnect_delay, Client, DEFAULT_CALL_TIMEOUT};
pub use error::{ClientError, ClientResult};

pub use wsrpc_protocol::{ErrorKind, RpcError};
