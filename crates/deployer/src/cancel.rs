//! Cooperative cancellation with optional deadlines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation signal shared between a caller and blocking operations
///
/// A token fires when it (or any ancestor it was derived from) is
/// cancelled, or when its deadline passes. Cancelling a child never
/// cancels its parent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    /// Own flag last, ancestors before it
    flags: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that only fires when cancelled explicitly
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
            deadline: None,
        }
    }

    /// A token that fires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child_with_timeout(timeout)
    }

    /// Derive a token that fires with this one but can be cancelled alone
    pub fn child(&self) -> Self {
        let mut flags = self.flags.clone();
        flags.push(Arc::new(AtomicBool::new(false)));
        Self {
            flags,
            deadline: self.deadline,
        }
    }

    /// Derive a child token whose deadline is at most `timeout` from now
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        let deadline = Instant::now() + timeout;
        child.deadline = Some(child.deadline.map_or(deadline, |d| d.min(deadline)));
        child
    }

    /// Fire this token and every token derived from it
    pub fn cancel(&self) {
        if let Some(own) = self.flags.last() {
            own.store(true, Ordering::SeqCst);
        }
    }

    /// Whether the token was cancelled or its deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.timed_out() || self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// Whether the deadline passed
    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Instant at which the token fires on its own
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
