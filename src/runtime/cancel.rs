//! Run-level cooperative cancellation.
//!
//! The scheduler checks the flag at its suspension points (between batches,
//! before firing a module); a cancelled run returns with whatever partial
//! state it accumulated. Per-attempt timeouts are a separate concern
//! handled by the execution wrappers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The run was cancelled
#[derive(Error, Debug, Clone)]
#[error("run cancelled after {elapsed:?}")]
pub struct CancelledError {
    /// How long the run had been going
    pub elapsed: Duration,
}

/// Cancellation controller for one run.
///
/// Cheap to clone; all clones share the flag.
#[derive(Clone)]
pub struct RunCancellation {
    cancelled: Arc<AtomicBool>,
    started: Instant,
}

impl RunCancellation {
    /// Fresh, uncancelled controller
    pub fn new() -> Self {
        RunCancellation {
            cancelled: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail if cancellation was requested
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            return Err(CancelledError {
                elapsed: self.started.elapsed(),
            });
        }
        Ok(())
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Handle usable from another task to cancel this run
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Default for RunCancellation {
    fn default() -> Self {
        RunCancellation::new()
    }
}

/// Detached cancellation handle
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancel the associated run
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
