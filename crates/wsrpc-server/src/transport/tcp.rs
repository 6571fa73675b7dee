//! Plain TCP transport with newline-delimited JSON frames.

use super::{
    Accepted, Connection, FrameHalves, FrameSink, FrameSource, TransportListener,
    DEFAULT_MAX_FRAME_BYTES,
};
use crate::error::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct TcpLineListener {
    address: String,
    max_frame_bytes: usize,
    listener: OnceLock<TcpListener>,
    stop: CancellationToken,
}

impl TcpLineListener {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            listener: OnceLock::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }
}

#[async_trait]
impl TransportListener for TcpLineListener {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn listen(&self) -> Result<SocketAddr, TransportError> {
        if let Some(listener) = self.listener.get() {
            return Ok(listener.local_addr()?);
        }

        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| TransportError::Bind {
                address: self.address.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        let _ = self.listener.set(listener);
        info!("TCP line transport listening on {}", local);
        Ok(local)
    }

    async fn accept(&self) -> Result<Accepted, TransportError> {
        let listener = self.listener.get().ok_or(TransportError::NotListening)?;

        tokio::select! {
            _ = self.stop.cancelled() => Ok(Accepted::Stopped),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("TCP connection from {}", peer);
                Ok(Accepted::Connection(Box::new(LineConnection {
                    stream,
                    peer,
                    max_frame_bytes: self.max_frame_bytes,
                })))
            }
        }
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

struct LineConnection {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_bytes: usize,
}

#[async_trait]
impl Connection for LineConnection {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    async fn open(self: Box<Self>) -> Result<FrameHalves, TransportError> {
        let (reader, writer) = self.stream.into_split();
        Ok(FrameHalves {
            source: Box::new(LineSource {
                reader: BufReader::new(reader),
                limit: self.max_frame_bytes,
                buf: Vec::new(),
            }),
            sink: Box::new(LineSink { writer }),
        })
    }
}

struct LineSource {
    reader: BufReader<OwnedReadHalf>,
    limit: usize,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameSource for LineSource {
    /// Reads at most `limit + 1` bytes per line, so a peer that never sends
    /// a newline is cut off at the limit instead of growing the buffer.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        let cap = self.limit as u64 + 1;
        loop {
            self.buf.clear();
            let read = match (&mut self.reader)
                .take(cap)
                .read_until(b'\n', &mut self.buf)
                .await
            {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if read == 0 {
                return None;
            }
            let content = match self.buf.last() {
                Some(b'\n') => self.buf.len() - 1,
                _ => self.buf.len(),
            };
            if content > self.limit {
                return Some(Err(TransportError::FrameTooLarge {
                    size: content,
                    limit: self.limit,
                }));
            }
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(Ok(std::mem::take(&mut self.buf)));
        }
    }
}

struct LineSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for LineSink {
    async fn send(&mut self, mut frame: Vec<u8>) -> Result<(), TransportError> {
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(limit: usize) -> (FrameHalves, TcpStream) {
        let listener = TcpLineListener::new("127.0.0.1:0").with_max_frame_bytes(limit);
        let addr = listener.listen().await.unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let conn = match listener.accept().await.unwrap() {
            Accepted::Connection(conn) => conn,
            Accepted::Stopped => panic!("listener stopped"),
        };
        (conn.open().await.unwrap(), client)
    }

    #[tokio::test]
    async fn test_lines_become_frames() {
        let (mut halves, mut client) = pair(1024).await;
        client.write_all(b"{\"a\":1}\n\n{\"b\":2}\n").await.unwrap();

        assert_eq!(halves.source.recv().await.unwrap().unwrap(), b"{\"a\":1}\n");
        // The blank line in between is skipped.
        assert_eq!(halves.source.recv().await.unwrap().unwrap(), b"{\"b\":2}\n");

        drop(client);
        assert!(halves.source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let (mut halves, mut client) = pair(8).await;
        client.write_all(b"0123456789abcdef\n").await.unwrap();

        let err = halves.source.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { limit: 8, .. }));
    }

    #[tokio::test]
    async fn test_line_of_exactly_limit_is_accepted() {
        let (mut halves, mut client) = pair(8).await;
        client.write_all(b"01234567\n").await.unwrap();

        assert_eq!(halves.source.recv().await.unwrap().unwrap(), b"01234567\n");
    }

    #[tokio::test]
    async fn test_unterminated_flood_is_cut_off_at_limit() {
        let (mut halves, mut client) = pair(8).await;
        let writer = tokio::spawn(async move {
            // Far more than the limit and no newline; the write may fail
            // once the server hangs up.
            let _ = client.write_all(&vec![b'x'; 4 * 1024 * 1024]).await;
            client
        });

        let err = tokio::time::timeout(std::time::Duration::from_secs(1), halves.source.recv())
            .await
            .expect("recv should not wait for a newline")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 9, limit: 8 }));

        drop(halves);
        writer.abort();
    }

    #[tokio::test]
    async fn test_sink_appends_newline() {
        let (mut halves, client) = pair(1024).await;
        halves.sink.send(b"{}".to_vec()).await.unwrap();

        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{}\n");
    }
}
