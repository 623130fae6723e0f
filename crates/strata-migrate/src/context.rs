use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::MigrateError;

/// Cancellation and deadline carrier passed to every migration operation.
///
/// Clones share the same cancellation flag, so a clone handed to a signal
/// handler can stop a migration running on another thread. The migrator
/// checks the context before each transaction and before each action;
/// transaction scopes check it again before committing.
///
/// ```
/// use strata_migrate::{Context, MigrateError};
///
/// let ctx = Context::new();
/// let handle = ctx.clone();
/// assert!(ctx.check().is_ok());
///
/// handle.cancel();
/// assert!(matches!(ctx.check(), Err(MigrateError::Cancelled)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`MigrateError::Cancelled`] or
    /// [`MigrateError::DeadlineExceeded`] when the work should stop.
    pub fn check(&self) -> Result<(), MigrateError> {
        if self.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(MigrateError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_passes() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancel_is_shared_by_clones() {
        let ctx = Context::new();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(MigrateError::Cancelled)));
    }

    #[test]
    fn expired_deadline() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(MigrateError::DeadlineExceeded)));
    }

    #[test]
    fn future_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_secs(3600));
        assert!(ctx.deadline().is_some());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancellation_wins_over_deadline() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_millis(1));
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(MigrateError::Cancelled)));
    }
}
