// Plugin Executor - runs in-process collectors
//
// The plugin call is synchronous, so it runs on the blocking pool behind a
// panic guard and an explicit deadline. Any failure marks the job IGNORED.

use super::clock::JobClock;
use super::worker::{execute_guarded, PanicGuardResult};
use crate::domain::Job;
use crate::port::{PluginError, PluginRegistry};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct PluginExecutor {
    plugins: PluginRegistry,
    clock: Arc<JobClock>,
    timeout: Duration,
}

impl PluginExecutor {
    pub fn new(plugins: PluginRegistry, clock: Arc<JobClock>, timeout: Duration) -> Self {
        Self {
            plugins,
            clock,
            timeout,
        }
    }

    /// Run the job's plugin and return the job in a terminal state
    pub async fn execute(&self, mut job: Job) -> Job {
        if let Err(e) = job.prepare(self.clock.next_timestamp()) {
            error!(job = %job, error = %e, "Cannot start plugin job");
            return job;
        }

        let outcome = match self.plugins.get(&job.command) {
            Some(plugin) => self.collect(plugin, &job).await,
            None => Err(PluginError::NotFound(job.command.clone())),
        };

        let transition = match outcome {
            Ok(value) => {
                debug!(job = %job, "Plugin finished");
                job.finish_with(value)
            }
            Err(e) => {
                warn!(job = %job, error = %e, "Plugin failed, ignoring job");
                job.ignore(e.to_string())
            }
        };
        if let Err(e) = transition {
            error!(job = %job, error = %e, "Invalid plugin job transition");
        }
        job
    }

    async fn collect(
        &self,
        plugin: Arc<dyn crate::port::Plugin>,
        job: &Job,
    ) -> Result<serde_json::Value, PluginError> {
        let handle = tokio::task::spawn_blocking(move || {
            execute_guarded(AssertUnwindSafe(|| plugin.collect()))
        });

        let timeout_millis = job.timeout_millis(self.timeout.as_millis() as i64);
        let deadline = Duration::from_millis(timeout_millis as u64);
        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(PanicGuardResult::Success(result))) => result,
            Ok(Ok(PanicGuardResult::Panicked(msg))) => {
                Err(PluginError::Failed(format!("panicked: {}", msg)))
            }
            Ok(Err(join_err)) => Err(PluginError::Failed(join_err.to_string())),
            // The blocking thread keeps running; its result is discarded
            Err(_) => Err(PluginError::DeadlineExceeded(deadline.as_millis() as i64)),
        }
    }
}
