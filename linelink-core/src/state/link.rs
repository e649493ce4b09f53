//! Link phase state machine and the shared liveness flags.
//!
//! [`LinkPhase`] models the lifecycle of one device link with validated
//! transitions that return `Result` instead of panicking. [`LinkStatus`]
//! holds the lock-free flags the loops and the owner poll every tick.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::LinkError;

// ── LinkPhase ────────────────────────────────────────────────────

/// The current phase of the device link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │              │
///       └───────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No socket. Initial state, and where every close lands.
    #[default]
    Disconnected,

    /// Resolving, connecting, or sending the init string.
    Connecting,

    /// Init string delivered; commands and keepalives may flow.
    Connected {
        /// When the link entered the `Connected` phase.
        since: Instant,
    },
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
        }
    }
}

impl LinkPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// How long the link has been up. `None` unless connected.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot connect: not in Disconnected phase",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot complete connect: not in Connecting phase",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current phase.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── LinkStatus ───────────────────────────────────────────────────

const NOT_WAITING: i64 = -1;

/// Liveness flags shared between the supervisor, both loops and the owner.
///
/// `connected` and the reply-wait counter are plain atomics so readers
/// never take the connection lock. A reading may trail a concurrent
/// close by up to one tick.
#[derive(Debug)]
pub struct LinkStatus {
    phase: Mutex<LinkPhase>,
    connected: AtomicBool,
    lost: AtomicBool,
    losses: AtomicU64,
    reply_wait: AtomicI64,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            phase: Mutex::new(LinkPhase::Disconnected),
            connected: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            losses: AtomicU64::new(0),
            reply_wait: AtomicI64::new(NOT_WAITING),
        }
    }
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase_lock(&self) -> MutexGuard<'_, LinkPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase_lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_connect(&self) -> Result<(), LinkError> {
        self.phase_lock().begin_connect()
    }

    pub(crate) fn mark_connected(&self) -> Result<(), LinkError> {
        self.phase_lock().complete_connect()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.phase_lock().force_disconnect();
    }

    // ── Lost latch ───────────────────────────────────────────────

    /// Record that the link dropped underneath us.
    pub(crate) fn latch_lost(&self) {
        self.losses.fetch_add(1, Ordering::SeqCst);
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Read and clear the lost latch.
    ///
    /// Several losses between two reads collapse into one `true`; use
    /// [`loss_count`](Self::loss_count) to tell them apart.
    pub fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::SeqCst)
    }

    /// Total number of losses since the status was created.
    pub fn loss_count(&self) -> u64 {
        self.losses.load(Ordering::SeqCst)
    }

    // ── Reply wait ───────────────────────────────────────────────

    /// Any inbound byte proves the peer is alive.
    pub(crate) fn reply_received(&self) {
        self.reply_wait.store(NOT_WAITING, Ordering::SeqCst);
    }

    pub(crate) fn clear_reply_wait(&self) {
        self.reply_wait.store(NOT_WAITING, Ordering::SeqCst);
    }

    pub(crate) fn start_reply_wait(&self) {
        self.reply_wait.store(0, Ordering::SeqCst);
    }

    pub fn awaiting_reply(&self) -> bool {
        self.reply_wait.load(Ordering::SeqCst) >= 0
    }

    /// Count one tick of waiting. Returns the updated tick count, or
    /// `None` when no reply is pending.
    pub(crate) fn advance_reply_wait(&self) -> Option<u64> {
        self.reply_wait
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                (w >= 0).then_some(w + 1)
            })
            .ok()
            .map(|prev| (prev + 1) as u64)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = LinkPhase::Disconnected;

        phase.begin_connect().unwrap();
        assert_eq!(phase, LinkPhase::Connecting);

        phase.complete_connect().unwrap();
        assert!(phase.is_connected());
        assert!(phase.connected_duration().is_some());

        phase.force_disconnect();
        assert_eq!(phase, LinkPhase::Disconnected);
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut phase = LinkPhase::Connected {
            since: Instant::now(),
        };
        assert!(phase.begin_connect().is_err());
    }

    #[test]
    fn invalid_transition_complete_from_disconnected() {
        let mut phase = LinkPhase::Disconnected;
        assert!(phase.complete_connect().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(LinkPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(LinkPhase::Connecting.to_string(), "Connecting");
        assert_eq!(
            LinkPhase::Connected {
                since: Instant::now()
            }
            .to_string(),
            "Connected"
        );
    }

    #[test]
    fn lost_latch_is_read_and_clear() {
        let status = LinkStatus::new();
        assert!(!status.take_lost());
        status.latch_lost();
        status.latch_lost();
        assert!(status.take_lost());
        assert!(!status.take_lost());
        assert_eq!(status.loss_count(), 2);
    }

    #[test]
    fn reply_wait_counts_only_when_pending() {
        let status = LinkStatus::new();
        assert_eq!(status.advance_reply_wait(), None);

        status.start_reply_wait();
        assert!(status.awaiting_reply());
        assert_eq!(status.advance_reply_wait(), Some(1));
        assert_eq!(status.advance_reply_wait(), Some(2));

        status.reply_received();
        assert!(!status.awaiting_reply());
        assert_eq!(status.advance_reply_wait(), None);
    }

    #[test]
    fn connected_flag_follows_phase() {
        let status = LinkStatus::new();
        assert!(status.mark_connected().is_err());

        status.begin_connect().unwrap();
        assert!(!status.is_connected());
        status.mark_connected().unwrap();
        assert!(status.is_connected());
        assert!(status.phase().is_connected());

        status.mark_disconnected();
        assert!(!status.is_connected());
        assert_eq!(status.phase(), LinkPhase::Disconnected);
    }
}
