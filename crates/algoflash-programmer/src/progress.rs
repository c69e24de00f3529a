//! Progress reporting shared between the worker and callers

use std::sync::atomic::{AtomicU8, Ordering};

/// Percentage of the current image that has been programmed
///
/// Written by the worker, read from any thread. Values only grow between
/// two calls to `reset`.
#[derive(Debug, Default)]
pub struct ProgressCounter(AtomicU8);

impl ProgressCounter {
    /// Create a counter at 0%
    pub fn new() -> Self {
        Self::default()
    }

    /// Current percentage (0 to 100)
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Report a new percentage; lower values than the current one are ignored
    pub fn report(&self, percent: u8) {
        self.0.fetch_max(percent.min(100), Ordering::AcqRel);
    }

    /// Start over at 0%
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_until_reset() {
        let progress = ProgressCounter::new();
        assert_eq!(progress.get(), 0);

        progress.report(40);
        progress.report(20);
        assert_eq!(progress.get(), 40);

        progress.report(250);
        assert_eq!(progress.get(), 100);

        progress.reset();
        assert_eq!(progress.get(), 0);
    }
}
