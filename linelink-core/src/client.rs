//! Public facade over the link engine.
//!
//! [`LineClient`] holds the configuration and callbacks, starts the two
//! control loops, and tears them down again. [`LineClientHandle`] is the
//! cheap, cloneable view the owner uses from other tasks or from inside
//! the poll callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::engine::keepalive::{self, Dispatcher};
use crate::engine::{LineCallback, PollCallback, receive};
use crate::error::LinkError;
use crate::network::{ConnectionSupervisor, TcpTransport, Transport};
use crate::queue::CommandQueue;
use crate::state::{LinkPhase, LinkStatus};
use crate::task::LoopSet;

// ── LineClientHandle ─────────────────────────────────────────────

/// Shared view of a client: liveness queries and the command queue.
#[derive(Clone)]
pub struct LineClientHandle {
    queue: Arc<CommandQueue>,
    status: Arc<LinkStatus>,
}

impl LineClientHandle {
    pub(crate) fn new(queue: Arc<CommandQueue>, status: Arc<LinkStatus>) -> Self {
        Self { queue, status }
    }

    /// Whether a link is up. May trail a concurrent close by one tick.
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Read and clear the connection-lost latch.
    pub fn take_connection_lost(&self) -> bool {
        self.status.take_lost()
    }

    /// Losses since the client was created; never reset.
    pub fn loss_count(&self) -> u64 {
        self.status.loss_count()
    }

    pub fn phase(&self) -> LinkPhase {
        self.status.phase()
    }

    /// How long the current link has been up.
    pub fn connected_for(&self) -> Option<Duration> {
        self.status.phase().connected_duration()
    }

    /// Queue a command for the dispatch loop. Sent verbatim.
    pub fn enqueue(&self, cmd: impl Into<String>) {
        self.queue.enqueue(cmd);
    }

    /// Commands waiting to be sent.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }
}

// ── LineClient ───────────────────────────────────────────────────

struct Session {
    supervisor: Arc<ConnectionSupervisor>,
    loops: LoopSet,
}

/// Persistent line-protocol client.
///
/// ```no_run
/// # use linelink_core::LineClient;
/// # async fn example() -> Result<(), linelink_core::LinkError> {
/// let mut client = LineClient::new();
/// client.configure("192.168.0.128", 49280, "devstatus runmode\n", 5000, "devstatus runmode\n", true)?;
/// client.set_receive_callback(|line| println!("RX {}", line.trim_end()));
/// client.start()?;
/// client.enqueue("set MIXER:Current/InCh/Fader/Level 0 0 0\n");
/// // … later …
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct LineClient {
    config: LinkConfig,
    transport: Option<Arc<dyn Transport>>,
    handle: LineClientHandle,
    connect_requested: Arc<AtomicBool>,
    on_line: Option<LineCallback>,
    on_poll: Option<PollCallback>,
    session: Option<Session>,
}

impl LineClient {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(config: LinkConfig) -> Self {
        Self {
            config,
            transport: None,
            handle: LineClientHandle::new(
                Arc::new(CommandQueue::new()),
                Arc::new(LinkStatus::new()),
            ),
            connect_requested: Arc::new(AtomicBool::new(false)),
            on_line: None,
            on_poll: None,
            session: None,
        }
    }

    /// Set the connection parameters. Only allowed while stopped.
    pub fn configure(
        &mut self,
        host: impl Into<String>,
        port: u16,
        init_string: impl Into<String>,
        keepalive_interval_ms: i64,
        keepalive_string: impl Into<String>,
        hide_keepalive_log: bool,
    ) -> Result<(), LinkError> {
        self.ensure_stopped()?;
        self.config.host = host.into();
        self.config.port = port;
        self.config.init_string = init_string.into();
        self.config.keepalive_interval_ms = keepalive_interval_ms;
        self.config.keepalive_string = keepalive_string.into();
        self.config.hide_keepalive_log = hide_keepalive_log;
        Ok(())
    }

    /// Replace the whole configuration. Only allowed while stopped.
    pub fn set_config(&mut self, config: LinkConfig) -> Result<(), LinkError> {
        self.ensure_stopped()?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Use `transport` instead of TCP for the next session.
    pub fn set_transport<T: Transport>(&mut self, transport: T) -> Result<(), LinkError> {
        self.ensure_stopped()?;
        self.transport = Some(Arc::new(transport));
        Ok(())
    }

    /// Register the line callback. Required before [`start`](Self::start).
    ///
    /// Runs on the receive loop; a slow callback stalls receiving.
    pub fn set_receive_callback<F>(&mut self, f: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_line = Some(Arc::new(f));
    }

    /// Register the per-tick poll callback.
    pub fn set_poll_callback<F>(&mut self, f: F)
    where
        F: Fn(&LineClientHandle) + Send + Sync + 'static,
    {
        self.on_poll = Some(Arc::new(f));
    }

    pub fn handle(&self) -> LineClientHandle {
        self.handle.clone()
    }

    fn ensure_stopped(&self) -> Result<(), LinkError> {
        match self.session {
            Some(_) => Err(LinkError::AlreadyRunning),
            None => Ok(()),
        }
    }

    /// Launch the keepalive and receive loops on the current runtime.
    ///
    /// Both loops start immediately; the keepalive loop makes the first
    /// connect attempt.
    pub fn start(&mut self) -> Result<(), LinkError> {
        self.ensure_stopped()?;
        let on_line = self
            .on_line
            .clone()
            .ok_or(LinkError::MissingReceiveCallback)?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| LinkError::TransportInitFailed(e.to_string()))?;

        let transport = match &self.transport {
            Some(t) => Arc::clone(t),
            None => Arc::new(TcpTransport::new(self.config.timing.connect_timeout)),
        };
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(self.config.clone()),
            transport,
            Arc::clone(&self.handle.queue),
            Arc::clone(&self.handle.status),
        ));
        self.handle.status.clear_reply_wait();
        self.connect_requested.store(true, Ordering::SeqCst);

        info!("starting link to {}", self.config.address());
        let mut loops = LoopSet::new();
        let dispatcher = Dispatcher::new(Arc::clone(&supervisor));
        let requested = Arc::clone(&self.connect_requested);
        let on_poll = self.on_poll.clone();
        let handle = self.handle.clone();
        loops.spawn("keepalive", move |token| {
            keepalive::run(dispatcher, requested, on_poll, handle, token)
        });
        let sup = Arc::clone(&supervisor);
        loops.spawn("receive", move |token| receive::run(sup, on_line, token));

        self.session = Some(Session { supervisor, loops });
        Ok(())
    }

    /// Stop both loops and close the link.
    ///
    /// Returns once both loops have terminated. Calling it on a stopped
    /// client is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), LinkError> {
        let Some(session) = self.session.take() else {
            debug!("disconnect: not running");
            return Ok(());
        };

        self.connect_requested.store(false, Ordering::SeqCst);
        info!("closing connection");
        session.supervisor.close().await;
        session.loops.cancel();

        info!("waiting for control loops to terminate");
        let joined = session.loops.shutdown().await;
        // A reconnect racing the first close cannot outlive the loops.
        session.supervisor.close().await;
        info!("link stopped");
        joined.map_err(LinkError::from)
    }

    /// Whether the loops are running.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn take_connection_lost(&self) -> bool {
        self.handle.take_connection_lost()
    }

    pub fn loss_count(&self) -> u64 {
        self.handle.loss_count()
    }

    pub fn phase(&self) -> LinkPhase {
        self.handle.phase()
    }

    pub fn enqueue(&self, cmd: impl Into<String>) {
        self.handle.enqueue(cmd);
    }
}

impl Default for LineClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryTransport;

    #[test]
    fn start_without_callback_fails() {
        let mut client = LineClient::new();
        assert!(matches!(
            client.start(),
            Err(LinkError::MissingReceiveCallback)
        ));
        assert!(!client.is_running());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let mut client = LineClient::new();
        client.set_receive_callback(|_| {});
        assert!(matches!(
            client.start(),
            Err(LinkError::TransportInitFailed(_))
        ));
    }

    #[test]
    fn configure_sets_fields() {
        let mut client = LineClient::new();
        client
            .configure("10.0.0.2", 50000, "init\n", 3000, "ka\n", true)
            .unwrap();
        let cfg = client.config();
        assert_eq!(cfg.address(), "10.0.0.2:50000");
        assert_eq!(cfg.init_string, "init\n");
        assert_eq!(cfg.keepalive_interval_ms, 3000);
        assert_eq!(cfg.keepalive_string, "ka\n");
        assert!(cfg.hide_keepalive_log);
    }

    #[tokio::test]
    async fn configure_while_running_is_rejected() {
        let (transport, _acceptor) = MemoryTransport::new();
        let mut client = LineClient::with_config(LinkConfig::new("device", 1));
        client.set_transport(transport).unwrap();
        client.set_receive_callback(|_| {});
        client.start().unwrap();

        assert!(matches!(
            client.configure("other", 2, "", 0, "", false),
            Err(LinkError::AlreadyRunning)
        ));
        assert!(matches!(client.start(), Err(LinkError::AlreadyRunning)));

        client.disconnect().await.unwrap();
        client.configure("other", 2, "", 0, "", false).unwrap();
    }

    #[tokio::test]
    async fn disconnect_when_stopped_is_noop() {
        let mut client = LineClient::new();
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn handle_shares_queue() {
        let client = LineClient::new();
        let handle = client.handle();
        handle.enqueue("a\n");
        client.enqueue("b\n");
        assert_eq!(handle.pending_commands(), 2);
        assert_eq!(handle.phase(), LinkPhase::Disconnected);
        assert!(handle.connected_for().is_none());
    }
}
