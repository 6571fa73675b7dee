//! The RPC server: configuration, startup and the accept/read/write loops.

use crate::config::{ListenConfig, ServerConfig};
use crate::dispatcher::{CallRequest, Dispatcher, ReplySender};
use crate::error::{RegistrationError, RegistrationResult, ServeError, TransportError};
use crate::lifecycle::{ServerState, ShutdownHandle};
use crate::pool::WorkerPool;
use crate::registry::Registry;
use crate::service::Service;
use crate::transport::{
    Accepted, Connection, ConnectionId, FrameHalves, TcpLineListener, TransportKind,
    TransportListener, WebSocketListener, DEFAULT_MAX_FRAME_BYTES,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};
use wsrpc_protocol::{ErrorKind, ReplyFrame, RpcError};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Unanswered calls one connection may have when the worker queue is
/// unbounded. A bounded queue uses its capacity instead.
const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

#[derive(Debug, Clone)]
struct Settings {
    threads: usize,
    queue_capacity: Option<usize>,
    max_frame_bytes: usize,
    shutdown_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            queue_capacity: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

enum ListenerSpec {
    WebSocket(String),
    Tcp(String),
    Custom(Arc<dyn TransportListener>),
}

impl ListenerSpec {
    fn build(self, max_frame_bytes: usize) -> Arc<dyn TransportListener> {
        match self {
            ListenerSpec::WebSocket(address) => {
                Arc::new(WebSocketListener::new(address).with_max_frame_bytes(max_frame_bytes))
            }
            ListenerSpec::Tcp(address) => {
                Arc::new(TcpLineListener::new(address).with_max_frame_bytes(max_frame_bytes))
            }
            ListenerSpec::Custom(listener) => listener,
        }
    }
}

/// Everything that may only change before `serve()`.
struct Setup {
    state: ServerState,
    registry: Registry,
    settings: Settings,
    listeners: Vec<ListenerSpec>,
}

struct Inner {
    setup: Mutex<Setup>,
    shutdown: CancellationToken,
    /// `Some` once startup finished; empty if it failed or the server stopped.
    bound: watch::Sender<Option<Vec<SocketAddr>>>,
}

/// A configurable RPC server.
///
/// Configure it fluently, then call [`serve`](Self::serve). `Server` is a
/// cheap handle, so a clone can be moved into a task to serve while the
/// original is kept for [`shutdown`](Self::shutdown):
///
/// ```ignore
/// let server = Server::new();
/// server
///     .set_num_of_threads(4)?
///     .add_service("user", user_service)?
///     .listen_websocket("127.0.0.1:8080")?;
/// server.serve().await?;
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                setup: Mutex::new(Setup {
                    state: ServerState::NotStarted,
                    registry: Registry::new(),
                    settings: Settings::default(),
                    listeners: Vec::new(),
                }),
                shutdown: CancellationToken::new(),
                bound,
            }),
        }
    }

    /// Build a server from loaded configuration. Services still need to be
    /// added.
    pub fn from_config(config: &ServerConfig) -> RegistrationResult<Self> {
        let server = Self::new();
        server
            .set_num_of_threads(config.threads)?
            .set_queue_capacity(config.queue_capacity)?
            .set_max_frame_bytes(config.max_frame_bytes)?
            .set_shutdown_timeout(config.shutdown_timeout())?;
        for listen in &config.listen {
            server.listen_config(listen)?;
        }
        Ok(server)
    }

    fn configure<F>(&self, f: F) -> RegistrationResult<&Self>
    where
        F: FnOnce(&mut Setup) -> RegistrationResult<()>,
    {
        let mut setup = self.inner.setup.lock();
        if !setup.state.is_configurable() {
            return Err(RegistrationError::AlreadyServing);
        }
        f(&mut setup)?;
        Ok(self)
    }

    /// Number of worker threads running handlers. Must be at least 1.
    pub fn set_num_of_threads(&self, threads: usize) -> RegistrationResult<&Self> {
        self.configure(|setup| {
            if threads == 0 {
                return Err(RegistrationError::InvalidConfig(
                    "number of threads must be at least 1".into(),
                ));
            }
            setup.settings.threads = threads;
            Ok(())
        })
    }

    /// Bound the worker queue. `0` means unbounded.
    pub fn set_queue_capacity(&self, capacity: usize) -> RegistrationResult<&Self> {
        self.configure(|setup| {
            setup.settings.queue_capacity = (capacity > 0).then_some(capacity);
            Ok(())
        })
    }

    /// Largest inbound frame accepted by the built-in transports.
    pub fn set_max_frame_bytes(&self, limit: usize) -> RegistrationResult<&Self> {
        self.configure(|setup| {
            if limit == 0 {
                return Err(RegistrationError::InvalidConfig(
                    "max frame size must be greater than 0".into(),
                ));
            }
            setup.settings.max_frame_bytes = limit;
            Ok(())
        })
    }

    /// How long shutdown waits for connections and workers to finish.
    pub fn set_shutdown_timeout(&self, timeout: Duration) -> RegistrationResult<&Self> {
        self.configure(|setup| {
            setup.settings.shutdown_timeout = timeout;
            Ok(())
        })
    }

    pub fn add_service(&self, path: &str, service: Service) -> RegistrationResult<&Self> {
        self.configure(|setup| setup.registry.add_service(path, service))
    }

    pub fn listen_websocket(&self, address: impl Into<String>) -> RegistrationResult<&Self> {
        let address = address.into();
        self.configure(|setup| {
            setup.listeners.push(ListenerSpec::WebSocket(address));
            Ok(())
        })
    }

    /// Newline-delimited JSON over plain TCP.
    pub fn listen_tcp(&self, address: impl Into<String>) -> RegistrationResult<&Self> {
        let address = address.into();
        self.configure(|setup| {
            setup.listeners.push(ListenerSpec::Tcp(address));
            Ok(())
        })
    }

    /// Serve on a caller-supplied transport.
    pub fn listen(&self, listener: Arc<dyn TransportListener>) -> RegistrationResult<&Self> {
        self.configure(|setup| {
            setup.listeners.push(ListenerSpec::Custom(listener));
            Ok(())
        })
    }

    pub fn listen_config(&self, listen: &ListenConfig) -> RegistrationResult<&Self> {
        match listen.kind {
            TransportKind::WebSocket => self.listen_websocket(listen.address.clone()),
            TransportKind::Tcp => self.listen_tcp(listen.address.clone()),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.setup.lock().state
    }

    /// Addresses the listeners are bound to. Empty unless running.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.bound.borrow().clone().unwrap_or_default()
    }

    /// Wait until `serve()` has bound its listeners (or failed to).
    ///
    /// Returns the bound addresses, or an empty list if startup failed or the
    /// server has already stopped.
    pub async fn wait_bound(&self) -> Vec<SocketAddr> {
        let mut rx = self.inner.bound.subscribe();
        let addrs = match rx.wait_for(Option::is_some).await {
            Ok(addrs) => addrs.clone().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        addrs
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.inner.shutdown.clone())
    }

    /// Ask a running `serve()` to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Run the server until shutdown is requested.
    ///
    /// Fails with `AlreadyServing` if called more than once, and with a
    /// transport `Bind` error if any listener cannot bind; in that case
    /// nothing is left running.
    pub async fn serve(&self) -> Result<(), ServeError> {
        let (registry, settings, specs) = {
            let mut setup = self.inner.setup.lock();
            if !setup.state.is_configurable() {
                return Err(RegistrationError::AlreadyServing.into());
            }
            setup.state = ServerState::Running;
            (
                std::mem::take(&mut setup.registry),
                setup.settings.clone(),
                std::mem::take(&mut setup.listeners),
            )
        };

        let result = self.run(registry, settings, specs).await;

        self.inner.setup.lock().state = ServerState::Stopped;
        self.inner.bound.send_replace(Some(Vec::new()));
        match &result {
            Ok(()) => info!("Server stopped"),
            Err(e) => error!("Server failed: {}", e),
        }
        result
    }

    async fn run(
        &self,
        registry: Registry,
        settings: Settings,
        specs: Vec<ListenerSpec>,
    ) -> Result<(), ServeError> {
        if specs.is_empty() {
            return Err(RegistrationError::InvalidConfig("no listen address configured".into()).into());
        }

        let routes = registry.routes();
        info!("Registered {} service(s), {} route(s)", registry.len(), routes.len());
        for route in &routes {
            debug!("Route {}", route);
        }

        let listeners: Vec<Arc<dyn TransportListener>> = specs
            .into_iter()
            .map(|spec| spec.build(settings.max_frame_bytes))
            .collect();

        let mut addrs = Vec::with_capacity(listeners.len());
        for listener in &listeners {
            match listener.listen().await {
                Ok(addr) => addrs.push(addr),
                Err(e) => {
                    for listener in &listeners {
                        listener.stop();
                    }
                    return Err(e.into());
                }
            }
        }

        let (pool, dispatcher) =
            match WorkerPool::start(settings.threads, settings.queue_capacity, Arc::new(registry)) {
                Ok(started) => started,
                Err(e) => {
                    for listener in &listeners {
                        listener.stop();
                    }
                    return Err(ServeError::WorkerSpawn(e));
                }
            };

        let max_in_flight = settings.queue_capacity.unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        let connections = TaskTracker::new();
        let connections_cancel = CancellationToken::new();
        let accept_loops: Vec<_> = listeners
            .iter()
            .map(|listener| {
                tokio::spawn(accept_loop(
                    Arc::clone(listener),
                    dispatcher.clone(),
                    max_in_flight,
                    connections.clone(),
                    connections_cancel.clone(),
                ))
            })
            .collect();

        info!("Serving on {:?} with {} worker(s)", addrs, pool.size());
        self.inner.bound.send_replace(Some(addrs));

        self.inner.shutdown.cancelled().await;
        info!("Shutdown requested");

        for listener in &listeners {
            listener.stop();
        }
        for handle in accept_loops {
            if let Err(e) = handle.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        connections_cancel.cancel();
        connections.close();
        drop(dispatcher);
        if tokio::time::timeout(settings.shutdown_timeout, connections.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connection(s) still open after {:?}",
                connections.len(),
                settings.shutdown_timeout
            );
        }

        pool.shutdown(settings.shutdown_timeout).await;
        Ok(())
    }
}

async fn accept_loop(
    listener: Arc<dyn TransportListener>,
    dispatcher: Dispatcher,
    max_in_flight: usize,
    connections: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        match listener.accept().await {
            Ok(Accepted::Connection(conn)) => {
                connections.spawn(handle_connection(
                    Arc::clone(&listener),
                    conn,
                    dispatcher.clone(),
                    max_in_flight,
                    cancel.clone(),
                ));
            }
            Ok(Accepted::Stopped) => break,
            Err(e) => {
                warn!(
                    "Accept error on {} {}: {}",
                    listener.kind(),
                    listener.address(),
                    e
                );
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    debug!("Accept loop for {} {} stopped", listener.kind(), listener.address());
}

/// Reads calls off one connection and writes their replies back.
///
/// At most `max_in_flight` calls from the connection are unanswered at a
/// time; a permit is taken per submitted call and returned once its reply
/// has been written. A peer that stops reading replies therefore stops
/// having its frames read instead of growing the reply queue.
async fn handle_connection(
    listener: Arc<dyn TransportListener>,
    conn: Box<dyn Connection>,
    dispatcher: Dispatcher,
    max_in_flight: usize,
    cancel: CancellationToken,
) {
    let connection_id = ConnectionId::new();
    let peer = conn.peer();

    let FrameHalves { mut source, mut sink } = match conn.open().await {
        Ok(halves) => halves,
        Err(e) => {
            debug!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };
    debug!("{} opened ({} from {})", connection_id, listener.kind(), peer);

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyFrame>();
    let reply = ReplySender::new(connection_id, reply_tx);

    let in_flight = Arc::new(Semaphore::new(max_in_flight.clamp(1, Semaphore::MAX_PERMITS)));
    let answered = Arc::clone(&in_flight);
    let encoder = Arc::clone(&listener);
    let writer = tokio::spawn(async move {
        while let Some(frame) = reply_rx.recv().await {
            // Frames without an id answer no submitted call.
            let permits = usize::from(frame.id.is_some());
            let sent = match encoder.encode(&frame) {
                Ok(bytes) => sink.send(bytes).await,
                Err(e) => {
                    error!("Failed to encode reply on {}: {}", connection_id, e);
                    Ok(())
                }
            };
            answered.add_permits(permits);
            if let Err(e) = sent {
                debug!("Dropping reply on {}: {}", connection_id, e);
                break;
            }
        }
        // Wakes a reader waiting for a permit once nothing will be written.
        answered.close();
        let _ = sink.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.recv() => frame,
        };

        let bytes = match frame {
            None => break,
            Some(Ok(bytes)) => bytes,
            Some(Err(e @ TransportError::FrameTooLarge { .. })) => {
                warn!("Rejecting frame from {} ({}): {}", peer, connection_id, e);
                let _ = reply.send(ReplyFrame::failure(
                    None,
                    RpcError::new(ErrorKind::SecurityLimit, e.to_string()),
                ));
                break;
            }
            Some(Err(e)) => {
                debug!("Read error on {}: {}", connection_id, e);
                break;
            }
        };

        let call = match listener.decode(&bytes) {
            Ok(call) => call,
            Err(e) => {
                warn!("Malformed frame from {} ({}): {}", peer, connection_id, e);
                let _ = reply.send(ReplyFrame::failure(None, RpcError::protocol(e.to_string())));
                break;
            }
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&in_flight).acquire_owned() => permit,
        };
        match permit {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        trace!("{} call {} -> {}", connection_id, call.id, call.target());
        let request = CallRequest::from_frame(call, connection_id, peer.clone());
        let submitted = tokio::select! {
            _ = cancel.cancelled() => break,
            submitted = dispatcher.submit(request, reply.clone()) => submitted,
        };
        if let Err(e) = submitted {
            debug!("Dropping call on {}: {}", connection_id, e);
            break;
        }
    }

    // The writer drains until every queued call from this connection has
    // replied, then closes the sink.
    drop(reply);
    drop(dispatcher);
    if let Err(e) = writer.await {
        warn!("Writer for {} ended abnormally: {}", connection_id, e);
    }
    debug!("{} closed", connection_id);
}
