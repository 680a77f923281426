// Panic isolation for agent tasks: a panicking plugin or task must not kill the agent
use crate::port::{ErrorReporter, TaskOutcome};
use std::any::Any;
use std::future::Future;
use std::panic::catch_unwind;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed successfully
    Success(T),
    /// Execution panicked
    Panicked(String),
}

pub(crate) fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Execute a closure with panic isolation
///
/// If the closure panics, the panic is caught and returned as PanicGuardResult::Panicked.
///
/// # Example
/// ```text
/// let result = execute_guarded(|| {
///     // This panic will be caught
///     panic!("test panic");
/// });
///
/// match result {
///     PanicGuardResult::Panicked(msg) => {
///         println!("Caught panic: {}", msg);
///     }
///     _ => {}
/// }
/// ```
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    match catch_unwind(f) {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = panic_message(panic_info.as_ref());
            error!(panic_msg = %panic_msg, "Guarded task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

/// Spawn a background task whose end is reported to `reporter`
///
/// The future runs in its own tokio task so a panic is caught by the
/// runtime and surfaces as `TaskOutcome::Panicked` instead of vanishing.
pub fn spawn_supervised<F>(
    name: impl Into<String>,
    reporter: Arc<dyn ErrorReporter>,
    future: F,
) -> JoinHandle<TaskOutcome>
where
    F: Future<Output = crate::error::Result<()>> + Send + 'static,
{
    let name = name.into();
    let inner = tokio::spawn(future);

    tokio::spawn(async move {
        let outcome = match inner.await {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                TaskOutcome::Panicked(panic_message(join_err.into_panic().as_ref()))
            }
            Err(_) => TaskOutcome::Cancelled,
        };

        if outcome == TaskOutcome::Completed {
            debug!(task = %name, "Task finished");
        } else {
            reporter.report(&name, &outcome);
        }
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;

    #[test]
    fn test_execute_guarded_catches_panic() {
        let result: PanicGuardResult<i32> = execute_guarded(|| panic!("boom"));
        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom"),
            PanicGuardResult::Success(_) => panic!("expected panic"),
        }
    }

    #[test]
    fn test_execute_guarded_passes_value() {
        let result = execute_guarded(|| 7);
        assert!(matches!(result, PanicGuardResult::Success(7)));
    }

    #[tokio::test]
    async fn test_spawn_supervised_reports_panic() {
        let reporter = Arc::new(RecordingErrorReporter::new());
        let handle = spawn_supervised("exploding", reporter.clone(), async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, TaskOutcome::Panicked("kaboom".to_string()));
        assert_eq!(
            reporter.reports(),
            vec![("exploding".to_string(), TaskOutcome::Panicked("kaboom".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_spawn_supervised_reports_error_not_success() {
        let reporter = Arc::new(RecordingErrorReporter::new());

        let ok = spawn_supervised("fine", reporter.clone(), async { Ok(()) });
        assert_eq!(ok.await.unwrap(), TaskOutcome::Completed);

        let failed = spawn_supervised("broken", reporter.clone(), async {
            Err(AppError::Internal("nope".to_string()))
        });
        assert!(matches!(failed.await.unwrap(), TaskOutcome::Failed(_)));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "broken");
    }
}
