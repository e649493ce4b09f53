//! Connection supervisor: sole owner of the live link.
//!
//! Connect, send and close are serialised by one async lock. The read
//! half of each link is parked in a slot for the receive loop to take,
//! so reading never holds that lock. Every link carries its own
//! cancellation token; closing the link cancels it, which is what wakes
//! a receive loop blocked on the old read half.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::LineCodec;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::network::transport::{LinkStream, Transport};
use crate::queue::CommandQueue;
use crate::state::LinkStatus;

/// Read side of one link, handed to the receive loop.
pub struct LinkReader {
    /// Id of the link this half belongs to.
    pub id: u64,
    pub reader: ReadHalf<LinkStream>,
    /// Cancelled when the supervisor closes this link.
    pub closed: CancellationToken,
}

struct ActiveLink {
    id: u64,
    writer: FramedWrite<WriteHalf<LinkStream>, LineCodec>,
    closed: CancellationToken,
}

impl ActiveLink {
    async fn write(&mut self, cmd: &str, timeout: Duration) -> Result<(), LinkError> {
        match tokio::time::timeout(timeout, self.writer.send(cmd.to_string())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(LinkError::Io(e))) => Err(LinkError::SendFailed(e)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LinkError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("send timed out after {timeout:?}"),
            ))),
        }
    }

    /// Cancel first so a blocked reader stops touching the stream, then
    /// shut the write side down. Best effort.
    async fn shutdown(mut self, timeout: Duration) {
        self.closed.cancel();
        match tokio::time::timeout(timeout, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(link = self.id, "shutdown error: {e}"),
            Err(_) => debug!(link = self.id, "shutdown timed out"),
        }
    }
}

/// Owns the socket lifetime and the connected/lost flags.
pub struct ConnectionSupervisor {
    config: Arc<LinkConfig>,
    transport: Arc<dyn Transport>,
    queue: Arc<CommandQueue>,
    status: Arc<LinkStatus>,
    link: tokio::sync::Mutex<Option<ActiveLink>>,
    pending_reader: Mutex<Option<LinkReader>>,
    next_id: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(
        config: Arc<LinkConfig>,
        transport: Arc<dyn Transport>,
        queue: Arc<CommandQueue>,
        status: Arc<LinkStatus>,
    ) -> Self {
        Self {
            config,
            transport,
            queue,
            status,
            link: tokio::sync::Mutex::new(None),
            pending_reader: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<LinkReader>> {
        self.pending_reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the read half of a freshly opened link, if one is waiting.
    pub fn take_reader(&self) -> Option<LinkReader> {
        self.reader_slot().take()
    }

    /// Open a link and deliver the init string.
    ///
    /// A no-op when already connected. Pending commands from a previous
    /// session are discarded first. If the init string cannot be sent
    /// the link is closed again and the error returned.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            debug!("connect: already connected");
            return Ok(());
        }

        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!("discarded {discarded} stale command(s)");
        }

        // No link under the lock means Disconnected, whatever an aborted
        // attempt left behind.
        self.status.mark_disconnected();
        self.status.begin_connect()?;
        info!("connecting to {}", self.config.address());
        match self.open_link().await {
            Ok((active, reader)) => {
                let id = active.id;
                *self.reader_slot() = Some(reader);
                *link = Some(active);
                self.status.mark_connected()?;
                info!(link = id, "connected to {}", self.config.address());
                Ok(())
            }
            Err(e) => {
                self.status.mark_disconnected();
                warn!("connect to {} failed: {e}", self.config.address());
                Err(e)
            }
        }
    }

    async fn open_link(&self) -> Result<(ActiveLink, LinkReader), LinkError> {
        let stream = self
            .transport
            .open(&self.config.host, self.config.port)
            .await?;
        let (reader, writer) = tokio::io::split(stream);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let closed = CancellationToken::new();
        let mut active = ActiveLink {
            id,
            writer: FramedWrite::new(writer, LineCodec::new()),
            closed: closed.clone(),
        };

        if !self.config.init_string.is_empty() {
            info!(link = id, "TX: {}", self.config.init_string.trim_end());
        }
        let timing = &self.config.timing;
        if let Err(e) = active.write(&self.config.init_string, timing.send_timeout).await {
            warn!(link = id, "failed to send init string: {e}");
            active.shutdown(timing.send_timeout).await;
            return Err(e);
        }

        Ok((active, LinkReader { id, reader, closed }))
    }

    /// Close the current link, if any. Idempotent.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        self.close_locked(&mut link).await;
    }

    /// Close the link only if `id` is still the current one.
    ///
    /// Used by the receive loop so an error on a stale link never tears
    /// down its replacement. Returns whether anything was closed.
    pub async fn close_link(&self, id: u64) -> bool {
        let mut link = self.link.lock().await;
        if link.as_ref().map(|active| active.id) != Some(id) {
            return false;
        }
        self.close_locked(&mut link).await;
        true
    }

    async fn close_locked(&self, link: &mut Option<ActiveLink>) {
        // Invalidate before shutting down: the slot is empty from here on.
        let active = link.take();
        self.reader_slot().take();
        if let Some(active) = active {
            info!(link = active.id, "closing connection");
            active.shutdown(self.config.timing.send_timeout).await;
        }
        // A pending reply belonged to the old link.
        self.status.clear_reply_wait();
        self.status.mark_disconnected();
    }

    /// Write one command verbatim.
    ///
    /// A failed write latches the lost flag and closes the link before
    /// returning the error.
    pub async fn send(&self, cmd: &str, hide_log: bool) -> Result<(), LinkError> {
        let mut link = self.link.lock().await;
        let result = match link.as_mut() {
            None => return Err(LinkError::NotConnected),
            Some(active) => {
                if !hide_log {
                    info!(link = active.id, "TX: {}", cmd.trim_end());
                }
                active.write(cmd, self.config.timing.send_timeout).await
            }
        };
        if let Err(e) = &result {
            warn!("socket send error: {e}");
            self.status.latch_lost();
            self.close_locked(&mut link).await;
        }
        result
    }
}
