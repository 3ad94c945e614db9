//! Detection of a verification service that is down for good

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::error;

/// Trips after `threshold` consecutive service failures; any reply resets the count
#[derive(Debug)]
pub struct FailureMonitor {
    threshold: usize,
    consecutive: AtomicUsize,
    tripped: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl FailureMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicUsize::new(0),
            tripped: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Count a failure; returns true once the monitor has tripped
    pub fn record_failure(&self, error: &impl Display) -> bool {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());

        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold && !self.tripped.swap(true, Ordering::SeqCst) {
            error!(
                consecutive = count,
                error = %error,
                "verification service failing consistently, halting run"
            );
        }
        self.is_tripped()
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_consecutive_failures() {
        let monitor = FailureMonitor::new(3);
        assert!(!monitor.record_failure(&"timeout"));
        assert!(!monitor.record_failure(&"timeout"));
        assert!(monitor.record_failure(&"connection refused"));
        assert!(monitor.is_tripped());
        assert_eq!(monitor.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_success_resets_count() {
        let monitor = FailureMonitor::new(2);
        monitor.record_failure(&"timeout");
        monitor.record_success();
        assert!(!monitor.record_failure(&"timeout"));
        assert!(!monitor.is_tripped());
    }

    #[test]
    fn test_tripped_stays_tripped() {
        let monitor = FailureMonitor::new(1);
        monitor.record_failure(&"down");
        monitor.record_success();
        assert!(monitor.is_tripped());
    }
}
