//! Configuration for the console client.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use linelink_core::{DEFAULT_PORT, LinkConfig, LinkTiming};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Device address and protocol strings.
    pub device: DeviceConfig,
    /// Loop periods and I/O bounds.
    pub timing: TimingConfig,
    /// Status variables and inbound queue.
    pub monitor: MonitorConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Device connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host name or IP address.
    pub host: String,
    pub port: u16,
    /// Sent after every successful connect. Empty sends nothing.
    pub init_string: String,
    /// Keepalive period in milliseconds; 0 or less disables it.
    pub keepalive_interval_ms: i64,
    pub keepalive_string: String,
    /// Keep keepalive traffic out of the TX log.
    pub hide_keepalive_log: bool,
    /// Drop the link when a keepalive goes unanswered.
    pub expect_keepalive_reply: bool,
    /// Appended to every stdin line before it is queued.
    pub command_terminator: String,
}

/// Loop timing, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub reply_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub idle_poll_ms: u64,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Status mirror and inbound queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Prefix of the `Conn`, `Initialized` and `ConnLost` variables.
    pub variable_prefix: String,
    /// Inbound lines held before new ones are dropped.
    pub inbound_queue_limit: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            init_string: String::new(),
            keepalive_interval_ms: 5000,
            keepalive_string: "devstatus runmode\n".into(),
            hide_keepalive_log: true,
            expect_keepalive_reply: false,
            command_terminator: "\n".into(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        let t = LinkTiming::default();
        Self {
            tick_ms: t.tick.as_millis() as u64,
            reply_timeout_ms: t.reply_timeout.as_millis() as u64,
            reconnect_interval_ms: t.reconnect_interval.as_millis() as u64,
            idle_poll_ms: t.idle_poll.as_millis() as u64,
            send_timeout_ms: t.send_timeout.as_millis() as u64,
            connect_timeout_ms: t.connect_timeout.as_millis() as u64,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            variable_prefix: "linelink".into(),
            inbound_queue_limit: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields `Ok(None)`. A file that exists but does not
    /// parse is an error naming the path.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        toml::from_str(&contents).map(Some).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid config {}: {e}", path.display()),
            )
        })
    }

    /// The default configuration as pretty TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Write the default configuration to `path`, for bootstrapping.
    pub fn write_default(path: &Path) -> io::Result<()> {
        let text = Self::default_toml().map_err(io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Build the link configuration. A zero tick is raised to 1 ms.
    pub fn to_link_config(&self) -> LinkConfig {
        let ms = Duration::from_millis;
        let d = &self.device;
        let t = &self.timing;
        LinkConfig {
            host: d.host.clone(),
            port: d.port,
            init_string: d.init_string.clone(),
            keepalive_interval_ms: d.keepalive_interval_ms,
            keepalive_string: d.keepalive_string.clone(),
            hide_keepalive_log: d.hide_keepalive_log,
            expect_keepalive_reply: d.expect_keepalive_reply,
            timing: LinkTiming {
                tick: ms(t.tick_ms.max(1)),
                reply_timeout: ms(t.reply_timeout_ms),
                reconnect_interval: ms(t.reconnect_interval_ms),
                idle_poll: ms(t.idle_poll_ms.max(1)),
                send_timeout: ms(t.send_timeout_ms),
                connect_timeout: ms(t.connect_timeout_ms),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
