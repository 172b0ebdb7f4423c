// src/utils/cancel.rs
//! Cooperative cancellation for long-running batch loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, polled between units and window steps
///
/// Clones observe the same flag, so a UI thread can keep one clone and cancel
/// a batch running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; already-processed units are kept
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear the flag so the token can be reused for the next batch
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}
