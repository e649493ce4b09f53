//! Stream transports the supervisor opens links over.
//!
//! [`TcpTransport`] is the production path. [`MemoryTransport`] connects
//! to an in-process peer over `tokio::io::duplex`, for tests and for
//! embedding the client next to a simulated device.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LinkError;

/// Any bidirectional byte stream a link can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type LinkStream = Box<dyn AsyncStream>;

/// Opens one outbound stream per call. No retry logic of its own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, host: &str, port: u16) -> Result<LinkStream, LinkError>;
}

// ── TcpTransport ─────────────────────────────────────────────────

/// Plain TCP: resolve, create a socket for the address family, connect.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, LinkError> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| LinkError::ResolutionFailed {
                host: host.to_string(),
                source,
            })?;
        addrs.next().ok_or_else(|| LinkError::ResolutionFailed {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, host: &str, port: u16) -> Result<LinkStream, LinkError> {
        let addr = Self::resolve(host, port).await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(LinkError::SocketCreateFailed)?;

        let connect_failed = |source: io::Error| LinkError::ConnectFailed {
            addr: addr.to_string(),
            source,
        };
        let stream: TcpStream = tokio::time::timeout(self.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| connect_failed(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
            .map_err(connect_failed)?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed on {addr}: {e}");
        }
        Ok(Box::new(stream))
    }
}

// ── MemoryTransport ──────────────────────────────────────────────

const MEMORY_BUFFER: usize = 64 * 1024;

/// In-process transport. Every successful `open` hands the far end of a
/// fresh duplex pipe to the paired [`MemoryAcceptor`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<DuplexStream>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
}

/// Receives the device side of each link opened through a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers: tx,
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU64::new(0)),
        };
        (transport, MemoryAcceptor { peers: rx })
    }

    /// Make subsequent `open` calls fail with `ConnectFailed`.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `open` calls so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, host: &str, port: u16) -> Result<LinkStream, LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = |reason: &str| LinkError::ConnectFailed {
            addr: format!("{host}:{port}"),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, reason.to_string()),
        };
        if self.refusing.load(Ordering::SeqCst) {
            return Err(refused("refusing connections"));
        }
        let (local, remote) = tokio::io::duplex(MEMORY_BUFFER);
        self.peers
            .send(remote)
            .map_err(|_| refused("acceptor dropped"))?;
        Ok(Box::new(local))
    }
}

impl MemoryAcceptor {
    /// Wait for the next link to be opened.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.peers.recv().await
    }

    /// The next already-opened link, without waiting.
    pub fn try_accept(&mut self) -> Option<DuplexStream> {
        self.peers.try_recv().ok()
    }
}
