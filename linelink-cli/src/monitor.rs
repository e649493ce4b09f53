//! Link status mirror and inbound line queue.
//!
//! [`StatusMirror`] runs from the poll callback and publishes three
//! variables into a [`VariableStore`]: `<prefix>Conn`,
//! `<prefix>Initialized` and `<prefix>ConnLost`, each `"0"` or `"1"`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use linelink_core::LineClientHandle;

/// What the mirror needs to know about a link.
pub trait LinkView {
    fn is_connected(&self) -> bool;
    /// Read and clear the connection-lost latch.
    fn take_connection_lost(&self) -> bool;
}

impl LinkView for LineClientHandle {
    fn is_connected(&self) -> bool {
        LineClientHandle::is_connected(self)
    }

    fn take_connection_lost(&self) -> bool {
        LineClientHandle::take_connection_lost(self)
    }
}

// ── VariableStore ────────────────────────────────────────────────

/// Named string variables shared with whoever displays them.
#[derive(Debug, Default)]
pub struct VariableStore {
    vars: Mutex<BTreeMap<String, String>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: &str) {
        let mut vars = self.vars.lock().unwrap_or_else(PoisonError::into_inner);
        if vars.get(name).map(String::as_str) != Some(value) {
            debug!("{name} = {value}");
        }
        vars.insert(name.to_owned(), value.to_owned());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All variables, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ── StatusMirror ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MirrorState {
    published: bool,
    connected: bool,
    known: bool,
}

/// Publishes connection state changes as variables.
#[derive(Debug)]
pub struct StatusMirror {
    conn: String,
    initialized: String,
    conn_lost: String,
    state: Mutex<MirrorState>,
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

impl StatusMirror {
    /// Variable names are the lowercased prefix plus a fixed suffix.
    pub fn new(prefix: &str) -> Self {
        let base = prefix.to_lowercase();
        Self {
            conn: format!("{base}Conn"),
            initialized: format!("{base}Initialized"),
            conn_lost: format!("{base}ConnLost"),
            state: Mutex::new(MirrorState::default()),
        }
    }

    pub fn conn_var(&self) -> &str {
        &self.conn
    }

    pub fn initialized_var(&self) -> &str {
        &self.initialized
    }

    pub fn conn_lost_var(&self) -> &str {
        &self.conn_lost
    }

    /// One poll tick.
    ///
    /// The lost latch is only consumed when the connected state did not
    /// change on this tick.
    pub fn poll(&self, link: &impl LinkView, vars: &VariableStore) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if !st.published {
            st.published = true;
            vars.set(&self.conn, flag(st.connected));
            vars.set(&self.initialized, flag(st.known));
            vars.set(&self.conn_lost, "0");
        }

        let connected = link.is_connected();
        if connected != st.connected || !st.known {
            st.connected = connected;
            st.known = true;
            if connected {
                info!("connected");
                vars.set(&self.conn, "1");
            } else {
                info!("disconnected");
                vars.set(&self.conn, "0");
                vars.set(&self.initialized, "0");
                vars.set(&self.conn_lost, "1");
            }
        } else if link.take_connection_lost() {
            vars.set(&self.initialized, "0");
            vars.set(&self.conn_lost, "1");
        }
    }
}

// ── InboundQueue ─────────────────────────────────────────────────

/// Producer side of the bounded inbound line queue.
///
/// Lines arriving while the queue is full are dropped.
#[derive(Debug, Clone)]
pub struct InboundQueue {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl InboundQueue {
    /// Create a queue holding at most `limit` lines (at least one).
    pub fn new(limit: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(limit.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (Self { tx, dropped }, rx)
    }

    /// Lines dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a line without waiting. Returns whether it was kept.
    pub fn push(&self, line: String) -> bool {
        match self.tx.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(line)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped = n, "inbound queue full, dropping {:?}", line.trim_end());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeLink {
        connected: AtomicBool,
        lost: AtomicBool,
    }

    impl FakeLink {
        fn set(&self, connected: bool, lost: bool) {
            self.connected.store(connected, Ordering::SeqCst);
            self.lost.store(lost, Ordering::SeqCst);
        }
    }

    impl LinkView for FakeLink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn take_connection_lost(&self) -> bool {
            self.lost.swap(false, Ordering::SeqCst)
        }
    }

    fn vars3(mirror: &StatusMirror, vars: &VariableStore) -> [String; 3] {
        [
            mirror.conn_var(),
            mirror.initialized_var(),
            mirror.conn_lost_var(),
        ]
        .map(|n| vars.get(n).unwrap_or_default())
    }

    #[test]
    fn names_use_lowercased_prefix() {
        let mirror = StatusMirror::new("Mixer");
        assert_eq!(mirror.conn_var(), "mixerConn");
        assert_eq!(mirror.initialized_var(), "mixerInitialized");
        assert_eq!(mirror.conn_lost_var(), "mixerConnLost");
    }

    #[test]
    fn first_tick_while_disconnected_reports_lost() {
        let mirror = StatusMirror::new("dev");
        let vars = VariableStore::new();
        let link = FakeLink::default();

        mirror.poll(&link, &vars);
        assert_eq!(vars3(&mirror, &vars), ["0", "0", "1"]);
    }

    #[test]
    fn connect_then_drop() {
        let mirror = StatusMirror::new("dev");
        let vars = VariableStore::new();
        let link = FakeLink::default();

        link.set(true, false);
        mirror.poll(&link, &vars);
        assert_eq!(vars3(&mirror, &vars), ["1", "0", "0"]);

        // Owner marks the session initialized after its own handshake.
        vars.set(mirror.initialized_var(), "1");
        mirror.poll(&link, &vars);
        assert_eq!(vars3(&mirror, &vars), ["1", "1", "0"]);

        link.set(false, true);
        mirror.poll(&link, &vars);
        assert_eq!(vars3(&mirror, &vars), ["0", "0", "1"]);
        // Latch untouched on a state-change tick.
        assert!(link.lost.load(Ordering::SeqCst));
    }

    #[test]
    fn lost_latch_without_state_change() {
        let mirror = StatusMirror::new("dev");
        let vars = VariableStore::new();
        let link = FakeLink::default();
        link.set(true, false);
        mirror.poll(&link, &vars);
        vars.set(mirror.initialized_var(), "1");

        // Lost and reconnected between two ticks.
        link.set(true, true);
        mirror.poll(&link, &vars);
        assert_eq!(vars3(&mirror, &vars), ["1", "0", "1"]);
        assert!(!link.lost.load(Ordering::SeqCst));
    }

    #[test]
    fn snapshot_is_sorted() {
        let vars = VariableStore::new();
        vars.set("b", "2");
        vars.set("a", "1");
        vars.set("b", "3");
        assert_eq!(
            vars.snapshot(),
            vec![("a".into(), "1".into()), ("b".into(), "3".into())]
        );
    }

    #[tokio::test]
    async fn inbound_queue_drops_when_full() {
        let (queue, mut rx) = InboundQueue::new(2);
        assert!(queue.push("one\n".into()));
        assert!(queue.push("two\n".into()));
        assert!(!queue.push("three\n".into()));
        assert_eq!(queue.dropped(), 1);

        assert_eq!(rx.recv().await.as_deref(), Some("one\n"));
        assert!(queue.push("four\n".into()));
        assert_eq!(rx.recv().await.as_deref(), Some("two\n"));
        assert_eq!(rx.recv().await.as_deref(), Some("four\n"));
    }

    #[test]
    fn push_after_receiver_dropped() {
        let (queue, rx) = InboundQueue::new(4);
        drop(rx);
        assert!(!queue.push("late\n".into()));
    }
}
