//! # linelink-cli: console front end
//!
//! Keeps a persistent link to a line-protocol device, forwards stdin
//! lines to it as commands and prints what the device sends back.
//!
//! ## Pieces
//!
//! - **Config**: TOML file with `[device]`, `[timing]`, `[monitor]` and
//!   `[logging]` sections.
//! - **Monitor**: status variables mirrored from the link on every poll
//!   tick, and the bounded inbound line queue.

pub mod config;
pub mod monitor;
