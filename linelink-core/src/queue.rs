//! Outbound command queue.
//!
//! FIFO of pending command strings. Any thread may enqueue; only the
//! dispatch loop dequeues. Its lock is independent of the connection
//! lock so enqueueing never waits behind an in-flight send.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Mutex<VecDeque<String>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command. Never fails; capping is up to the caller.
    pub fn enqueue(&self, cmd: impl Into<String>) {
        self.lock().push_back(cmd.into());
    }

    /// Pop the oldest command, if any.
    pub fn try_dequeue(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Drop everything pending. Returns how many commands were discarded.
    pub fn clear(&self) -> usize {
        let mut pending = self.lock();
        let n = pending.len();
        pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
