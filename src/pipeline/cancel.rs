//! Cooperative cancellation for long-running analyses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AssayError, Result};

/// Shared cancel flag, polled between units of work.
///
/// Clones observe the same flag: the caller keeps one handle and passes
/// another into the orchestrator. Cancellation is checked at plate
/// boundaries and between per-sample fits, so a request takes effect at the
/// next such checkpoint rather than mid-fit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fails with [`AssayError::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AssayError::Cancelled)
        } else {
            Ok(())
        }
    }
}
