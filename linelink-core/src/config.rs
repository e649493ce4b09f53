//! Link configuration.
//!
//! A [`LinkConfig`] is fixed for the duration of a session: the client
//! snapshots it on `start` and the control loops never see it change.

use std::time::Duration;

/// Default port of the remote line device.
pub const DEFAULT_PORT: u16 = 49280;

// ── LinkTiming ───────────────────────────────────────────────────

/// Periods driving the keepalive/dispatch loop.
///
/// All thresholds are counted in ticks, derived by integer division of
/// the period by [`tick`](Self::tick).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTiming {
    /// Keepalive/dispatch loop period.
    pub tick: Duration,
    /// Silence after which a pending reply counts as lost.
    pub reply_timeout: Duration,
    /// Spacing of reconnect attempts while disconnected.
    pub reconnect_interval: Duration,
    /// Receive loop back-off while there is no link to read from.
    pub idle_poll: Duration,
    /// Upper bound on a single send.
    pub send_timeout: Duration,
    /// Upper bound on establishing a TCP connection.
    pub connect_timeout: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(20),
            reply_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(20),
            idle_poll: Duration::from_millis(100),
            send_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl LinkTiming {
    fn ticks(&self, period: Duration) -> u64 {
        let tick = self.tick.as_millis().max(1);
        (period.as_millis() / tick) as u64
    }

    /// Ticks of silence before a pending reply times out.
    pub fn reply_timeout_ticks(&self) -> u64 {
        self.ticks(self.reply_timeout).max(1)
    }

    /// Ticks between reconnect attempts.
    pub fn reconnect_ticks(&self) -> u64 {
        self.ticks(self.reconnect_interval).max(1)
    }
}

// ── LinkConfig ───────────────────────────────────────────────────

/// Everything the client needs to reach and keep talking to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Host name or address of the device.
    pub host: String,
    /// TCP port of the device.
    pub port: u16,
    /// Sent verbatim right after every successful connect.
    pub init_string: String,
    /// Keepalive period in milliseconds; `<= 0` disables keepalive.
    pub keepalive_interval_ms: i64,
    /// Sent verbatim every keepalive period while the queue is idle.
    pub keepalive_string: String,
    /// Suppress TX logging of keepalive traffic.
    pub hide_keepalive_log: bool,
    /// Start the reply-wait counter when a keepalive goes out.
    ///
    /// Off by default, in which case keepalive replies are not tracked
    /// and the reply timeout never fires.
    pub expect_keepalive_reply: bool,
    /// Loop periods and I/O bounds.
    pub timing: LinkTiming,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            init_string: String::new(),
            keepalive_interval_ms: -1,
            keepalive_string: String::new(),
            hide_keepalive_log: false,
            expect_keepalive_reply: false,
            timing: LinkTiming::default(),
        }
    }
}

impl LinkConfig {
    /// Configuration for `host:port` with no init string and no keepalive.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Whether keepalive messages are sent at all.
    pub fn keepalive_enabled(&self) -> bool {
        self.keepalive_interval_ms > 0
    }

    /// Keepalive period in ticks. Only meaningful when enabled.
    pub fn keepalive_ticks(&self) -> u64 {
        if !self.keepalive_enabled() {
            return 0;
        }
        let tick = self.timing.tick.as_millis().max(1) as u64;
        self.keepalive_interval_ms as u64 / tick
    }

    /// `host:port`, for logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
