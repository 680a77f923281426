// Job Domain Model
//
// One scheduled execution of an activity. Lifecycle:
// INITIALIZED -> RUNNING | BLOCKED
// RUNNING -> FINISHED | TIMED_OUT | IGNORED
// Terminal states never transition again.

use super::activity::{Activity, ActivityId, ActivityKind, MetricDefinitions};
use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initialized,
    Blocked,
    Running,
    TimedOut,
    Finished,
    Ignored,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Blocked | JobStatus::TimedOut | JobStatus::Finished | JobStatus::Ignored
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Initialized => write!(f, "INITIALIZED"),
            JobStatus::Blocked => write!(f, "BLOCKED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::TimedOut => write!(f, "TIMED_OUT"),
            JobStatus::Finished => write!(f, "FINISHED"),
            JobStatus::Ignored => write!(f, "IGNORED"),
        }
    }
}

/// Where the result of a job lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutput {
    None,
    /// Combined stdout/stderr written by the shell
    File(PathBuf),
    /// Structured value returned by a plugin
    Value(serde_json::Value),
    /// Reason a job could not produce output
    Failure(String),
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub activity_id: ActivityId,
    pub command: String,
    pub kind: ActivityKind,
    /// Activity interval in seconds (bounds the effective timeout)
    pub interval: u64,

    /// Epoch ms at which the job is due
    pub exec_timestamp: i64,
    /// Epoch ms at which execution started; unique per executor, used as correlation key
    pub started_at: Option<i64>,

    pub is_whitelisted: bool,
    pub status: JobStatus,

    pub output: JobOutput,
    pub pid: Option<i32>,
    pub return_code: i32,

    /// Metrics to read out of the command output
    #[serde(default)]
    pub metrics: MetricDefinitions,
}

impl Job {
    pub fn new(activity: &Activity, exec_timestamp: i64, is_whitelisted: bool) -> Self {
        Self {
            activity_id: activity.id.clone(),
            command: activity.command.clone(),
            kind: activity.kind,
            interval: activity.interval,
            exec_timestamp,
            started_at: None,
            is_whitelisted,
            status: JobStatus::Initialized,
            output: JobOutput::None,
            pid: None,
            return_code: 0,
            metrics: activity.metrics.clone(),
        }
    }

    fn transition(&mut self, allowed_from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != allowed_from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record the start timestamp and move to RUNNING, or BLOCKED when not whitelisted
    pub fn prepare(&mut self, started_at: i64) -> Result<()> {
        let to = if self.is_whitelisted {
            JobStatus::Running
        } else {
            JobStatus::Blocked
        };
        self.transition(JobStatus::Initialized, to)?;
        self.started_at = Some(started_at);
        Ok(())
    }

    /// Apply a `<field> <value>` update reported by the shell
    ///
    /// `pid` records the process id, `return_code` finishes the job.
    /// Unknown fields are rejected so callers can log them.
    pub fn apply_field(&mut self, field: &str, value: &str) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: format!("{} update", field),
            });
        }

        let parsed = value
            .trim()
            .parse::<i32>()
            .map_err(|_| DomainError::InvalidFieldValue {
                field: field.to_string(),
                value: value.to_string(),
            })?;

        match field {
            "pid" => {
                self.pid = Some(parsed);
                Ok(())
            }
            "return_code" => {
                self.return_code = parsed;
                self.status = JobStatus::Finished;
                Ok(())
            }
            other => Err(DomainError::InvalidFieldValue {
                field: other.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Finish with a structured value (plugin jobs)
    pub fn finish_with(&mut self, value: serde_json::Value) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Finished)?;
        self.output = JobOutput::Value(value);
        self.return_code = 0;
        Ok(())
    }

    pub fn time_out(&mut self) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::TimedOut)
    }

    /// Mark as IGNORED; ignored jobs produce no result
    pub fn ignore(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Ignored)?;
        self.output = JobOutput::Failure(reason.into());
        Ok(())
    }

    /// Effective timeout: the configured timeout, capped by the activity interval
    pub fn timeout_millis(&self, configured_timeout_ms: i64) -> i64 {
        let interval_ms = (self.interval as i64).saturating_mul(1000);
        interval_ms.min(configured_timeout_ms)
    }

    /// Whether a RUNNING job has outlived its effective timeout
    pub fn is_expired(&self, now_millis: i64, configured_timeout_ms: i64) -> bool {
        match (self.status, self.started_at) {
            (JobStatus::Running, Some(started_at)) => {
                now_millis - started_at > self.timeout_millis(configured_timeout_ms)
            }
            _ => false,
        }
    }

    /// Result timestamp: start time when started, otherwise the due time
    pub fn result_timestamp(&self) -> i64 {
        self.started_at.unwrap_or(self.exec_timestamp)
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        match &self.output {
            JobOutput::File(path) => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) @ {}",
            self.activity_id,
            self.command,
            self.result_timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_job() -> Job {
        let activity = Activity::new("a1", "uptime", "uptime", 60);
        let mut job = Job::new(&activity, 1_000, true);
        job.prepare(1_500).unwrap();
        job
    }

    #[test]
    fn test_prepare_whitelisted_runs() {
        let job = running_job();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(1_500));
    }

    #[test]
    fn test_prepare_not_whitelisted_blocks() {
        let activity = Activity::new("a1", "rm", "rm -rf /tmp/x", 60);
        let mut job = Job::new(&activity, 1_000, false);
        job.prepare(1_000).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_prepare_twice_fails() {
        let mut job = running_job();
        let err = job.prepare(2_000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_pid_then_return_code_finishes() {
        let mut job = running_job();
        job.apply_field("pid", "4242").unwrap();
        assert_eq!(job.pid, Some(4242));
        assert_eq!(job.status, JobStatus::Running);

        job.apply_field("return_code", "3").unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.return_code, 3);
    }

    #[test]
    fn test_terminal_state_rejects_updates() {
        let mut job = running_job();
        job.time_out().unwrap();
        assert!(job.apply_field("return_code", "0").is_err());
        assert!(job.ignore("late").is_err());
        assert_eq!(job.status, JobStatus::TimedOut);
    }

    #[test]
    fn test_unknown_field_and_bad_value_rejected() {
        let mut job = running_job();
        assert!(matches!(
            job.apply_field("pid", "abc"),
            Err(DomainError::InvalidFieldValue { .. })
        ));
        assert!(job.apply_field("colour", "1").is_err());
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_timeout_capped_by_interval() {
        let activity = Activity::new("a1", "fast", "sleep 10", 2);
        let mut job = Job::new(&activity, 0, true);
        job.prepare(10_000).unwrap();

        assert_eq!(job.timeout_millis(30_000), 2_000);
        assert!(!job.is_expired(12_000, 30_000));
        assert!(job.is_expired(12_001, 30_000));
    }

    #[test]
    fn test_plugin_finish_sets_value() {
        let activity = Activity::plugin("p1", "metrics", "system_metrics", 30);
        let mut job = Job::new(&activity, 0, true);
        job.prepare(5).unwrap();
        job.finish_with(serde_json::json!({"cpu": 1.5})).unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.output, JobOutput::Value(serde_json::json!({"cpu": 1.5})));
    }
}
