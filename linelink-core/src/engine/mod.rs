//! The two control loops that drive a running client.

use std::sync::Arc;

use crate::client::LineClientHandle;

pub(crate) mod keepalive;
pub(crate) mod receive;

/// Invoked on the receive loop for every complete inbound line.
pub type LineCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked on the keepalive loop once per tick, connected or not.
pub type PollCallback = Arc<dyn Fn(&LineClientHandle) + Send + Sync>;
