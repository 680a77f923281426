// Command Executor Port
// Runs whitelisted shell commands asynchronously and hands back jobs once they are done.

use crate::domain::Job;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Write to shell failed: {0}")]
    WriteFailed(String),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Command Executor trait
///
/// Implementations:
/// - ShellExecutor: one persistent shell process fed over a line protocol
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Take ownership of a job and start it
    ///
    /// The job is tracked even when the write to the shell fails; it is then
    /// reported by the next `finish_jobs` sweep with an unresolved status.
    async fn add_job(&self, job: Job) -> Result<(), ExecutionError>;

    /// Sweep: time out expired jobs and return every job that reached a terminal
    /// state (or could not be resolved) since the last sweep
    async fn finish_jobs(&self) -> Vec<Job>;

    /// Replace the environment exported into the shell
    async fn set_env_variables(&self, variables: &BTreeMap<String, String>);

    /// Kill the shell and clean up in-flight outputs
    async fn stop(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobStatus;
    use std::sync::Mutex;

    /// Completes every job immediately with a fixed text result
    pub struct MockCommandExecutor {
        output: String,
        return_code: i32,
        pending: Mutex<Vec<Job>>,
        added: Mutex<Vec<Job>>,
        env: Mutex<Vec<BTreeMap<String, String>>>,
        stopped: Mutex<bool>,
    }

    impl MockCommandExecutor {
        pub fn new(output: impl Into<String>, return_code: i32) -> Self {
            Self {
                output: output.into(),
                return_code,
                pending: Mutex::new(Vec::new()),
                added: Mutex::new(Vec::new()),
                env: Mutex::new(Vec::new()),
                stopped: Mutex::new(false),
            }
        }

        pub fn added(&self) -> Vec<Job> {
            self.added.lock().unwrap().clone()
        }

        pub fn env_updates(&self) -> Vec<BTreeMap<String, String>> {
            self.env.lock().unwrap().clone()
        }

        pub fn is_stopped(&self) -> bool {
            *self.stopped.lock().unwrap()
        }
    }

    #[async_trait]
    impl CommandExecutor for MockCommandExecutor {
        async fn add_job(&self, mut job: Job) -> Result<(), ExecutionError> {
            self.added.lock().unwrap().push(job.clone());
            let started_at = job.exec_timestamp;
            job.prepare(started_at)
                .map_err(|e| ExecutionError::InvalidCommand(e.to_string()))?;
            if job.status == JobStatus::Running {
                job.finish_with(serde_json::Value::String(self.output.clone()))
                    .map_err(|e| ExecutionError::InvalidCommand(e.to_string()))?;
                job.return_code = self.return_code;
            }
            self.pending.lock().unwrap().push(job);
            Ok(())
        }

        async fn finish_jobs(&self) -> Vec<Job> {
            std::mem::take(&mut *self.pending.lock().unwrap())
        }

        async fn set_env_variables(&self, variables: &BTreeMap<String, String>) {
            self.env.lock().unwrap().push(variables.clone());
        }

        async fn stop(&self) {
            *self.stopped.lock().unwrap() = true;
        }
    }
}
