//! Cooperative cancellation for terminal query operations.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A cloneable flag observed by terminal operations.
///
/// Streams check the flag at every item boundary and end early once it is set; scalar
/// operations check it before executing and fail with
/// [`StoreError::Cancelled`](crate::error::StoreError::Cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every operation observing this signal or one of its clones.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = CancelSignal::new();
        let observer = signal.clone();

        assert!(!observer.is_cancelled());
        signal.cancel();
        assert!(observer.is_cancelled());
    }
}
