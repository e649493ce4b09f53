//! # linelink-core
//!
//! Persistent client for remote devices that speak newline-terminated
//! text over TCP.
//!
//! This crate contains:
//! - **Client**: `LineClient` facade with start/stop, enqueue and liveness queries
//! - **Network**: `ConnectionSupervisor` owning the live link, and the
//!   `Transport` trait with TCP and in-memory implementations
//! - **Codec**: `LineCodec` for CR/LF line splitting
//! - **Queue**: `CommandQueue`, the FIFO of outbound commands
//! - **State**: `LinkPhase` state machine and the shared `LinkStatus` flags
//! - **Task**: `LoopSet` for the cancellable control loops
//! - **Error**: `LinkError`, typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod config;
mod engine;
pub mod error;
pub mod network;
pub mod queue;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{LineClient, LineClientHandle};
pub use codec::LineCodec;
pub use config::{DEFAULT_PORT, LinkConfig, LinkTiming};
pub use engine::{LineCallback, PollCallback};
pub use error::{LinkError, TaskError};
pub use network::{
    ConnectionSupervisor, LinkStream, MemoryAcceptor, MemoryTransport, TcpTransport, Transport,
};
pub use queue::CommandQueue;
pub use state::{LinkPhase, LinkStatus};
pub use task::LoopSet;
