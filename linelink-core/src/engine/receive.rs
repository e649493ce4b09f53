//! Receive loop.
//!
//! Waits for the supervisor to publish a link, then reads it until the
//! link is closed or fails. Every inbound byte counts as a reply; every
//! complete line goes to the line callback on this task.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::LineCodec;
use crate::engine::LineCallback;
use crate::error::LinkError;
use crate::network::{ConnectionSupervisor, LinkReader};

const READ_CHUNK: usize = 4096;

/// How one link's read session ended.
enum ReadEnd {
    Shutdown,
    Closed,
    Failed,
}

pub(crate) async fn run(
    sup: Arc<ConnectionSupervisor>,
    on_line: LineCallback,
    shutdown: CancellationToken,
) {
    debug!("receive loop started");
    let idle = sup.config().timing.idle_poll;

    while !shutdown.is_cancelled() {
        let Some(link) = sup.take_reader() else {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(idle) => continue,
            }
        };

        let id = link.id;
        match read_link(&sup, link, &on_line, &shutdown).await {
            ReadEnd::Shutdown => break,
            ReadEnd::Closed => debug!(link = id, "link closed, receive idle"),
            ReadEnd::Failed => {
                sup.status().latch_lost();
                sup.close_link(id).await;
            }
        }
    }

    debug!("receive loop exiting");
}

async fn read_link(
    sup: &ConnectionSupervisor,
    mut link: LinkReader,
    on_line: &LineCallback,
    shutdown: &CancellationToken,
) -> ReadEnd {
    let idle = sup.config().timing.idle_poll;
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return ReadEnd::Shutdown,
            _ = link.closed.cancelled() => return ReadEnd::Closed,
            r = link.reader.read_buf(&mut buf) => r,
        };

        match read {
            // End of stream is not treated as a loss: the next failed
            // send or a reply timeout will catch a dead peer.
            Ok(0) => {
                trace!(link = link.id, "end of stream");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return ReadEnd::Shutdown,
                    _ = link.closed.cancelled() => return ReadEnd::Closed,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
            Ok(_) => {
                sup.status().reply_received();
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(line)) => on_line(line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(link = link.id, "dropping undecodable input: {e}");
                            buf.clear();
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(link = link.id, "{}", LinkError::RecvFailed(e));
                return ReadEnd::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

    use crate::config::LinkConfig;
    use crate::network::{LinkStream, MemoryTransport, Transport};
    use crate::queue::CommandQueue;
    use crate::state::LinkStatus;

    fn fast_config() -> LinkConfig {
        let mut config = LinkConfig::new("device", 49280);
        config.timing.idle_poll = Duration::from_millis(5);
        config
    }

    /// Accepts writes, resets on every read.
    struct ResetOnRead;

    impl AsyncRead for ResetOnRead {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    impl AsyncWrite for ResetOnRead {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// First link resets on read; later links go over memory.
    struct ResetFirst {
        used: AtomicBool,
        next: MemoryTransport,
    }

    #[async_trait]
    impl Transport for ResetFirst {
        async fn open(&self, host: &str, port: u16) -> Result<LinkStream, LinkError> {
            if !self.used.swap(true, Ordering::SeqCst) {
                return Ok(Box::new(ResetOnRead));
            }
            self.next.open(host, port).await
        }
    }

    fn collector() -> (LineCallback, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let cb: LineCallback = Arc::new(move |line| sink.lock().unwrap().push(line));
        (cb, lines)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn byte_by_byte_crlf_yields_one_line() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let sup = Arc::new(ConnectionSupervisor::new(
            Arc::new(fast_config()),
            Arc::new(transport),
            Arc::new(CommandQueue::new()),
            Arc::new(LinkStatus::new()),
        ));
        sup.connect().await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        sup.status().start_reply_wait();
        let (cb, lines) = collector();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&sup), cb, shutdown.clone()));

        for b in [b"O", b"K", b"\r", b"\n"] {
            peer.write_all(b).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_for(|| !lines.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*lines.lock().unwrap(), vec!["OK\r".to_string()]);
        assert!(!sup.status().awaiting_reply());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_unblocks_reader_and_next_link_is_read() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let sup = Arc::new(ConnectionSupervisor::new(
            Arc::new(fast_config()),
            Arc::new(transport),
            Arc::new(CommandQueue::new()),
            Arc::new(LinkStatus::new()),
        ));
        let (cb, lines) = collector();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&sup), cb, shutdown.clone()));

        sup.connect().await.unwrap();
        let _first = acceptor.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sup.close().await;
        assert!(!sup.status().take_lost());

        sup.connect().await.unwrap();
        let mut second = acceptor.accept().await.unwrap();
        second.write_all(b"NOTIFY set\n").await.unwrap();
        wait_for(|| lines.lock().unwrap().len() == 1).await;
        assert_eq!(lines.lock().unwrap()[0], "NOTIFY set\n");

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_is_not_a_loss() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let sup = Arc::new(ConnectionSupervisor::new(
            Arc::new(fast_config()),
            Arc::new(transport),
            Arc::new(CommandQueue::new()),
            Arc::new(LinkStatus::new()),
        ));
        let (cb, _lines) = collector();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&sup), cb, shutdown.clone()));

        sup.connect().await.unwrap();
        drop(acceptor.accept().await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sup.is_connected());
        assert!(!sup.status().take_lost());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn read_error_latches_lost_and_next_link_is_read() {
        let (next, mut acceptor) = MemoryTransport::new();
        let transport = ResetFirst {
            used: AtomicBool::new(false),
            next,
        };
        let sup = Arc::new(ConnectionSupervisor::new(
            Arc::new(fast_config()),
            Arc::new(transport),
            Arc::new(CommandQueue::new()),
            Arc::new(LinkStatus::new()),
        ));
        let (cb, lines) = collector();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&sup), cb, shutdown.clone()));

        sup.connect().await.unwrap();
        wait_for(|| !sup.is_connected()).await;
        assert!(sup.status().take_lost());
        assert_eq!(sup.status().loss_count(), 1);
        assert!(lines.lock().unwrap().is_empty());

        sup.connect().await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        peer.write_all(b"OK\n").await.unwrap();
        wait_for(|| lines.lock().unwrap().len() == 1).await;
        assert_eq!(lines.lock().unwrap()[0], "OK\n");
        assert!(sup.is_connected());
        assert!(!sup.status().take_lost());

        shutdown.cancel();
        task.await.unwrap();
    }
}
