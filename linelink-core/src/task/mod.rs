//! Lifecycle of the long-running control loops.
//!
//! A [`LoopSet`] spawns named loops that share one cancellation token.
//! Shutdown cancels the token and joins every loop, so the caller knows
//! the loops are gone before it releases what they were using.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;

struct NamedLoop {
    name: &'static str,
    handle: JoinHandle<()>,
}

pub struct LoopSet {
    shutdown: CancellationToken,
    loops: Vec<NamedLoop>,
}

impl LoopSet {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            loops: Vec::new(),
        }
    }

    /// Spawn a loop on the current runtime.
    ///
    /// `f` receives the shared shutdown token; the future it returns
    /// should finish soon after the token is cancelled.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let handle = tokio::spawn(f(token));
        debug!("spawned {name} loop");
        self.loops.push(NamedLoop { name, handle });
    }

    /// Whether any loop is still running.
    pub fn is_running(&self) -> bool {
        self.loops.iter().any(|l| !l.handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Request termination without waiting.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Cancel and wait for every loop to finish.
    ///
    /// All loops are joined even if one of them failed; the first
    /// failure is returned.
    pub async fn shutdown(mut self) -> Result<(), TaskError> {
        self.shutdown.cancel();
        let mut first_err = None;
        for NamedLoop { name, handle } in std::mem::take(&mut self.loops) {
            match handle.await {
                Ok(()) => debug!("{name} loop terminated"),
                Err(e) => {
                    let err = TaskError::from_join(name, e);
                    tracing::warn!("{err}");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for LoopSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoopSet {
    fn drop(&mut self) {
        // Loops never outlive their set.
        self.shutdown.cancel();
    }
}
