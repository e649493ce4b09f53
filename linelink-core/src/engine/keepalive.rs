//! Keepalive/dispatch loop.
//!
//! Runs on a fixed tick. While connected it watches the reply timer,
//! sends the keepalive line when due and otherwise drains at most one
//! queued command per tick. While disconnected it retries the connect
//! every reconnect interval. The poll callback runs after each tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::LineClientHandle;
use crate::engine::PollCallback;
use crate::error::LinkError;
use crate::network::ConnectionSupervisor;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Idle,
    KeepaliveSent,
    CommandSent,
    SendFailed,
    ReplyTimeout,
    Reconnected,
    ReconnectFailed,
}

pub(crate) struct Dispatcher {
    sup: Arc<ConnectionSupervisor>,
    keepalive_ticks: u64,
    reply_timeout_ticks: u64,
    reconnect_ticks: u64,
    /// Connected ticks since start, for the keepalive log line.
    activity: u64,
    since_keepalive: u64,
    disconnected_ticks: u64,
}

impl Dispatcher {
    pub(crate) fn new(sup: Arc<ConnectionSupervisor>) -> Self {
        let config = sup.config();
        let keepalive_ticks = config.keepalive_ticks();
        let reply_timeout_ticks = config.timing.reply_timeout_ticks();
        let reconnect_ticks = config.timing.reconnect_ticks();
        Self {
            sup,
            keepalive_ticks,
            reply_timeout_ticks,
            reconnect_ticks,
            activity: 0,
            since_keepalive: 0,
            disconnected_ticks: 0,
        }
    }

    pub(crate) async fn tick(&mut self) -> TickOutcome {
        if self.sup.is_connected() {
            self.disconnected_ticks = 0;
            self.tick_connected().await
        } else {
            self.tick_disconnected().await
        }
    }

    async fn tick_connected(&mut self) -> TickOutcome {
        let sup = &self.sup;
        let config = sup.config();
        let status = sup.status();
        self.activity += 1;

        if let Some(waited) = status.advance_reply_wait() {
            if waited >= self.reply_timeout_ticks {
                warn!("{}", LinkError::NoReplyTimeout(config.timing.reply_timeout));
                status.clear_reply_wait();
                status.latch_lost();
                sup.close().await;
                return TickOutcome::ReplyTimeout;
            }
        }

        let keepalive_due = config.keepalive_enabled() && {
            self.since_keepalive += 1;
            self.since_keepalive >= self.keepalive_ticks
        };
        if keepalive_due {
            self.since_keepalive = 0;
            debug!(counter = self.activity, "keepalive");
            if config.expect_keepalive_reply {
                // The window runs from the first unanswered keepalive.
                if !status.awaiting_reply() {
                    status.start_reply_wait();
                }
            } else {
                status.clear_reply_wait();
            }
            return match sup
                .send(&config.keepalive_string, config.hide_keepalive_log)
                .await
            {
                Ok(()) => TickOutcome::KeepaliveSent,
                Err(e) => {
                    status.clear_reply_wait();
                    debug!("keepalive not sent: {e}");
                    TickOutcome::SendFailed
                }
            };
        }

        let Some(cmd) = sup.queue().try_dequeue() else {
            return TickOutcome::Idle;
        };
        // A command postpones the next keepalive.
        self.since_keepalive = 0;
        match sup.send(&cmd, false).await {
            Ok(()) => TickOutcome::CommandSent,
            Err(e) => {
                debug!("command dropped: {e}");
                TickOutcome::SendFailed
            }
        }
    }

    async fn tick_disconnected(&mut self) -> TickOutcome {
        self.disconnected_ticks += 1;
        if self.disconnected_ticks % self.reconnect_ticks != 0 {
            return TickOutcome::Idle;
        }
        info!("reconnecting to {}", self.sup.config().address());
        match self.sup.connect().await {
            Ok(()) => TickOutcome::Reconnected,
            Err(_) => TickOutcome::ReconnectFailed,
        }
    }
}

pub(crate) async fn run(
    mut dispatcher: Dispatcher,
    connect_requested: Arc<AtomicBool>,
    on_poll: Option<PollCallback>,
    handle: LineClientHandle,
    shutdown: CancellationToken,
) {
    debug!("keepalive loop started");
    if connect_requested.load(Ordering::SeqCst) {
        // Failure is logged by the supervisor; the reconnect cycle retries.
        let _ = dispatcher.sup.connect().await;
    }

    let mut ticker = tokio::time::interval(dispatcher.sup.config().timing.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if connect_requested.load(Ordering::SeqCst) {
            dispatcher.tick().await;
        }
        if let Some(poll) = &on_poll {
            poll(&handle);
        }
    }

    debug!("keepalive loop exiting");
}
