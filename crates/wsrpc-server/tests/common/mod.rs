//! Test utilities for server integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::task::JoinHandle;
use wsrpc_server::{CallContext, Return, ServeError, Server, Service};

/// A server running on an ephemeral port for the duration of a test.
pub struct TestServer {
    pub server: Server,
    pub addrs: Vec<SocketAddr>,
    task: Option<JoinHandle<Result<(), ServeError>>>,
}

impl TestServer {
    /// Serve `server` (already configured) in a background task and wait
    /// until its listeners are bound.
    pub async fn start(server: Server) -> Self {
        let running = server.clone();
        let task = tokio::spawn(async move { running.serve().await });
        let addrs = server.wait_bound().await;
        assert!(!addrs.is_empty(), "server failed to bind");
        Self {
            server,
            addrs,
            task: Some(task),
        }
    }

    /// WebSocket URL of the first listener.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addrs[0])
    }

    pub async fn stop(mut self) -> Result<(), ServeError> {
        self.server.shutdown();
        match self.task.take() {
            Some(task) => task.await.expect("serve task panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// The demo `user` service plus a method that always panics.
pub fn user_service() -> Service {
    Service::new()
        .reply("SayHello", |ctx: CallContext, name: String| {
            ctx.ok(format!("hello {name}"))
        })
        .unwrap()
        .reply("Crash", |_ctx: CallContext| -> Return { panic!("handler exploded") })
        .unwrap()
        .reply("Sleep", |ctx: CallContext, ms: u64| {
            std::thread::sleep(std::time::Duration::from_millis(ms));
            ctx.ok(ms)
        })
        .unwrap()
}

/// `user` service on `threads` workers, WebSocket on an ephemeral port.
pub fn websocket_server(threads: usize) -> Server {
    let server = Server::new();
    server
        .set_num_of_threads(threads)
        .unwrap()
        .add_service("user", user_service())
        .unwrap()
        .listen_websocket("127.0.0.1:0")
        .unwrap();
    server
}
