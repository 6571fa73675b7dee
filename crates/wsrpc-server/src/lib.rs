//! wsrpc server
//!
//! A multi-threaded RPC runtime. Services register typed handler functions
//! under a path; a [`Server`] accepts connections on one or more transports,
//! decodes call frames and runs handlers on a fixed pool of worker threads.
//! Each reply goes back to the connection its call arrived on.
//!
//! ```ignore
//! use wsrpc_server::{CallContext, Server, Service};
//!
//! let user = Service::new()
//!     .reply("SayHello", |ctx: CallContext, name: String| ctx.ok(format!("hello {name}")))?;
//!
//! let server = Server::new();
//! server
//!     .set_num_of_threads(4)?
//!     .add_service("user", user)?
//!     .listen_websocket("127.0.0.1:8080")?;
//! server.serve().await?;
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod param;
pub mod pool;
pub mod registry;
pub mod server;
pub mod service;
pub mod transport;

pub use config::{ConfigError, ListenConfig, ServerConfig};
pub use context::{CallContext, Return};
pub use dispatcher::{execute, CallRequest, DispatchError, Dispatcher, ReplySender};
pub use error::{RegistrationError, ResolutionError, ServeError, TransportError};
pub use handler::Handler;
pub use lifecycle::{ServerState, ShutdownHandle};
pub use param::{Param, ParamKind};
pub use pool::{PoolStats, WorkerPool};
pub use registry::Registry;
pub use server::Server;
pub use service::{MethodDescriptor, Service};
pub use transport::{
    Accepted, Connection, ConnectionId, FrameHalves, FrameSink, FrameSource, TcpLineListener,
    TransportKind, TransportListener, WebSocketListener,
};

pub use wsrpc_protocol::{CallFrame, CallId, ErrorKind, ReplyFrame, RpcError};
