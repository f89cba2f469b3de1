//! Structured failure tracking.
//!
//! Components never swallow errors silently: every failure is handed to a
//! [`FailureTracker`] with enough identity to inspect later. A tracker
//! records; escalation (failing the whole import) stays with the caller
//! that decided `fail_import`.

use std::sync::Mutex;

use crate::error::Transience;
use crate::import::ImportError;

/// One recorded failure.
#[derive(Clone, Debug)]
pub struct FailureEvent {
    pub project_id: u64,
    /// Identity of the failing component (stage or importer name).
    pub source: String,
    pub message: String,
    pub transience: Transience,
    /// Whether this failure terminated the whole import.
    pub fail_import: bool,
}

pub trait FailureTracker: Send + Sync {
    fn track(&self, project_id: u64, source: &str, error: &ImportError, fail_import: bool);
}

/// Tracker that logs each failure and retains it for inspection.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<FailureEvent>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FailureEvent> {
        self.events
            .lock()
            .expect("failure events lock poisoned")
            .clone()
    }

    /// Recorded failures that terminated an import.
    pub fn fatal_events(&self) -> Vec<FailureEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.fail_import)
            .collect()
    }

    /// Recorded permanently-invalid-input failures.
    pub fn validation_events(&self) -> Vec<FailureEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.transience == Transience::Permanent && !e.fail_import)
            .collect()
    }
}

impl FailureTracker for RecordingTracker {
    fn track(&self, project_id: u64, source: &str, error: &ImportError, fail_import: bool) {
        tracing::error!(
            project_id,
            source,
            error = %error,
            fail_import,
            "import failure recorded"
        );
        self.events
            .lock()
            .expect("failure events lock poisoned")
            .push(FailureEvent {
                project_id,
                source: source.to_string(),
                message: error.to_string(),
                transience: error.transience(),
                fail_import,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_classifies_events() {
        let tracker = RecordingTracker::new();
        tracker.track(
            1,
            "pull_request",
            &ImportError::Validation {
                field: "title".to_string(),
                reason: "missing".to_string(),
            },
            false,
        );
        tracker.track(
            1,
            "pull_request",
            &ImportError::Execution {
                project_id: 1,
                reason: "write failed".to_string(),
            },
            true,
        );

        assert_eq!(tracker.events().len(), 2);
        assert_eq!(tracker.validation_events().len(), 1);
        let fatal = tracker.fatal_events();
        assert_eq!(fatal.len(), 1);
        assert!(fatal[0].fail_import);
        assert_eq!(fatal[0].project_id, 1);
    }
}
