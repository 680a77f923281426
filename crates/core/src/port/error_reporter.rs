// Error Reporter Port
// Receives the outcome of supervised background tasks that did not end cleanly.

use tracing::{error, warn};

/// How a supervised task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_) | TaskOutcome::Panicked(_))
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, task: &str, outcome: &TaskOutcome);
}

/// Production reporter: structured log lines
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, task: &str, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Panicked(msg) => error!(task = %task, panic_msg = %msg, "Task panicked"),
            TaskOutcome::Failed(msg) => error!(task = %task, error = %msg, "Task failed"),
            TaskOutcome::Cancelled => warn!(task = %task, "Task cancelled"),
            TaskOutcome::Completed => {}
        }
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every report
    #[derive(Default)]
    pub struct RecordingErrorReporter {
        reports: Mutex<Vec<(String, TaskOutcome)>>,
    }

    impl RecordingErrorReporter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reports(&self) -> Vec<(String, TaskOutcome)> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl ErrorReporter for RecordingErrorReporter {
        fn report(&self, task: &str, outcome: &TaskOutcome) {
            self.reports
                .lock()
                .unwrap()
                .push((task.to_string(), outcome.clone()));
        }
    }
}
