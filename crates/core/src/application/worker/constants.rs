// Agent constants
use std::time::Duration;

/// Scheduler tick period; also the lookahead window for due jobs (5s)
pub const TICK_PERIOD: Duration = Duration::from_secs(5);

/// Default per-command timeout, capped by the activity interval (30s)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on consumer tasks
pub const DEFAULT_MAX_CONSUMERS: usize = 8;

/// Commands a shell process may run before it is recycled while idle
pub const DEFAULT_RECYCLE_THRESHOLD: u64 = 2222;

/// Smallest accepted activity interval in seconds
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 1;

/// Records taken from the offline queue per sender batch
pub const SENDER_BATCH_SIZE: usize = 10;

/// Pause between sender batches after the server became unreachable (10s)
pub const SENDER_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Job queue capacity; producers wait when it is full
pub const JOB_QUEUE_CAPACITY: usize = 1024;

/// Time budget for extracting the metrics of one result (2s)
pub const METRIC_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes of command output read into a result (256 KiB)
pub const OUTPUT_READ_LIMIT: u64 = 256 * 1024;

/// How long shutdown waits for consumers to finish the job in hand (5s)
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
