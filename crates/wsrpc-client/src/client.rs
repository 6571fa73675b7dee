//! WebSocket client implementation

use crate::error::{ClientError, ClientResult};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use wsrpc_protocol::{codec, CallFrame, CallId, ReplyFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<DashMap<CallId, oneshot::Sender<ReplyFrame>>>;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Waits between connection attempts, in seconds. Attempts therefore start
/// at 0, 2, 5, 8, 15 and 30 seconds, then every 30 seconds.
const RECONNECT_SCHEDULE: [u64; 6] = [0, 2, 3, 3, 7, 15];
const RECONNECT_STEADY: u64 = 30;

/// How long to wait before connection attempt number `attempt` (0-based).
pub fn reconnect_delay(attempt: usize) -> Duration {
    let secs = RECONNECT_SCHEDULE
        .get(attempt)
        .copied()
        .unwrap_or(RECONNECT_STEADY);
    Duration::from_secs(secs)
}

pub struct Client {
    sink: Mutex<SplitSink<WsStream, Message>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Client {
    /// Connect to a server at `url`, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> ClientResult<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = ws.split();

        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_replies(
            stream,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        debug!("Connected to {}", url);
        Ok(Self {
            sink: Mutex::new(sink),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_CALL_TIMEOUT,
            reader,
        })
    }

    /// Connect, retrying on the reconnect schedule up to `attempts` times.
    pub async fn connect_with_retry(url: &str, attempts: usize) -> ClientResult<Self> {
        let attempts = attempts.max(1);
        let mut last_error = ClientError::Closed;

        for attempt in 0..attempts {
            let delay = reconnect_delay(attempt);
            if !delay.is_zero() {
                debug!("Reconnecting to {} in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }
            match Self::connect(url).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!("Connection attempt {} to {} failed: {}", attempt + 1, url, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Per-call reply timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Calls sent but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Call `service.method` with positional `args` and wait for the result.
    pub async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> ClientResult<Value> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = codec::encode_call(&CallFrame::new(id, service, method, args))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        // The reader may have shut down between the check above and the insert.
        if self.is_closed() {
            self.pending.remove(&id);
            return Err(ClientError::Closed);
        }

        let sent = {
            let mut sink = self.sink.lock().await;
            sink.send(Message::binary(frame)).await
        };
        if let Err(e) = sent {
            self.pending.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply.into_result().map_err(ClientError::Rpc),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout(self.timeout))
            }
        }
    }

    /// Send a close frame. Outstanding calls fail with `Closed`.
    pub async fn close(&self) -> ClientResult<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies(mut stream: SplitStream<WsStream>, pending: Pending, closed: Arc<AtomicBool>) {
    while let Some(message) = stream.next().await {
        let bytes = match message {
            Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket read failed: {}", e);
                break;
            }
        };

        let reply = match codec::decode_reply(&bytes) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Ignoring undecodable reply: {}", e);
                continue;
            }
        };

        match reply.id {
            Some(id) => match pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(reply);
                }
                None => debug!("Reply for unknown or expired call {}", id),
            },
            None => {
                if let Some(err) = &reply.error {
                    warn!("Server rejected a frame: {}", err);
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiting caller with `Closed`.
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0)]
    #[test_case(1, 2)]
    #[test_case(2, 3)]
    #[test_case(3, 3)]
    #[test_case(4, 7)]
    #[test_case(5, 15)]
    #[test_case(6, 30)]
    #[test_case(100, 30)]
    fn test_reconnect_delay(attempt: usize, secs: u64) {
        assert_eq!(reconnect_delay(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn test_schedule_reaches_steady_state_at_thirty_seconds() {
        let starts: Vec<u64> = (0..6)
            .scan(0, |at, attempt| {
                *at += reconnect_delay(attempt).as_secs();
                Some(*at)
            })
            .collect();
        assert_eq!(starts, vec![0, 2, 5, 8, 15, 30]);
    }
}
