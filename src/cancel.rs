//! Cancellation token: shared abort flag plus optional wall-clock deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::types::{CompareError, CompareOptions, Result};

/// Shared cancellation state for one comparison operation.
///
/// Workers call [`check`](CancelToken::check) before each chunk read and each
/// queue dequeue; the first-failure aggregator and SIGINT handlers flip the
/// flag via [`cancel`](CancelToken::cancel). The deadline is fixed when the
/// operation starts.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    budget: Option<Duration>,
}

impl CancelToken {
    /// Token for an operation starting now, honoring the options' wall-clock
    /// budget and external cancel flag.
    pub fn for_options(opts: &CompareOptions) -> Self {
        CancelToken {
            flag: opts
                .cancel_flag
                .clone()
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            deadline: opts.comparison_timeout.map(|t| Instant::now() + t),
            budget: opts.comparison_timeout,
        }
    }

    /// Token that never fires. For internal sub-steps that are bounded by an
    /// enclosing token.
    pub fn unbounded() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
            budget: None,
        }
    }

    /// Request cancellation. In-flight work observes it at the next chunk
    /// boundary or dequeue.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Error if cancelled or past the deadline, Ok otherwise.
    pub fn check(&self) -> Result<()> {
        if self.flag.load(Ordering::Relaxed) {
            return Err(CompareError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            // Propagate so the pool drains; every sibling worker surfaces
            // the same timeout.
            self.flag.store(true, Ordering::Relaxed);
            return Err(CompareError::Timeout(
                self.budget.unwrap_or_default(),
            ));
        }
        Ok(())
    }
}
