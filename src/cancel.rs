//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a cloneable handle shared between the caller
//! and the merge engine. The engine checks it between major phases: per
//! file, per matcher invocation, and per cost-model iteration. When the
//! caller cancels, the current scenario is abandoned, partial results are
//! discarded, and the scenario is recorded in the crash registry with a
//! [`MergeError::Cancelled`] cause.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::MergeError;

/// Cloneable cancellation handle. All clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Phase boundary check: `Err(Cancelled)` once cancellation was
    /// requested, `Ok(())` otherwise.
    pub fn check(&self, scenario: &str) -> Result<(), MergeError> {
        if self.is_cancelled() {
            Err(MergeError::Cancelled {
                scenario: scenario.to_owned(),
            })
        } else {
            Ok(())
        }
    }
}
