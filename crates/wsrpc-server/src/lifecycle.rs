//! Server lifecycle state and shutdown signalling.

use std::fmt;
use tokio_util::sync::CancellationToken;

/// Where a [`Server`](crate::Server) is in its life.
///
/// Transitions only go forward: `NotStarted -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Running,
    Stopped,
}

impl ServerState {
    pub fn is_configurable(&self) -> bool {
        matches!(self, ServerState::NotStarted)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::NotStarted => "not started",
            ServerState::Running => "running",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Cloneable trigger that makes a running `serve()` return.
///
/// Firing before `serve()` is called makes it shut down as soon as it has
/// started.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
