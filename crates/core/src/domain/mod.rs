// Domain Layer - Pure agent entities (activities, jobs, results)

pub mod activity;
pub mod error;
pub mod job;
pub mod record;

// Re-exports
pub use activity::{
    Activity, ActivityId, ActivityKind, MetricDefinition, MetricDefinitions, MetricId,
};
pub use error::DomainError;
pub use job::{Job, JobOutput, JobStatus};
pub use record::{
    MetricValues, OfflineRecord, ResultData, ResultPayload, BLOCKED_MESSAGE, EMPTY_OUTPUT_MESSAGE,
    TIMEOUT_MESSAGE, UNREADABLE_OUTPUT_MESSAGE, UNRESOLVED_MESSAGE,
};
