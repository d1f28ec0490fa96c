//! Cooperative cancellation of long analyses.

use flowsens_core::{GridError, GridResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between contingency states, never inside a
/// Newton-Raphson run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(GridError::Cancelled)` once cancelled.
    pub fn check(&self) -> GridResult<()> {
        if self.is_cancelled() {
            Err(GridError::Cancelled)
        } else {
            Ok(())
        }
    }
}
