// Agent configuration (runtime knobs; loaded from the environment by the daemon)

use super::worker::constants::*;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory for command output files
    pub temp_dir: PathBuf,
    /// Per-command timeout, capped by each activity's interval
    pub command_timeout: Duration,
    /// Regex patterns a command must match at its start to run
    pub whitelist: Vec<String>,
    pub max_consumers: usize,
    /// Commands run before an idle shell is recycled
    pub recycle_threshold: u64,
    pub min_interval_secs: u64,
    pub tick_period: Duration,
    pub job_queue_capacity: usize,
    pub sender_batch_size: usize,
    pub sender_retry_interval: Duration,
    pub output_read_limit: u64,
    /// Budget for reading metrics out of one command's output
    pub metric_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("outpost"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            whitelist: Vec::new(),
            max_consumers: DEFAULT_MAX_CONSUMERS,
            recycle_threshold: DEFAULT_RECYCLE_THRESHOLD,
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            tick_period: TICK_PERIOD,
            job_queue_capacity: JOB_QUEUE_CAPACITY,
            sender_batch_size: SENDER_BATCH_SIZE,
            sender_retry_interval: SENDER_RETRY_INTERVAL,
            output_read_limit: OUTPUT_READ_LIMIT,
            metric_timeout: METRIC_TIMEOUT,
        }
    }
}

impl AgentConfig {
    pub fn command_timeout_millis(&self) -> i64 {
        self.command_timeout.as_millis() as i64
    }
}
