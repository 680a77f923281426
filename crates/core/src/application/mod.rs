// Application Layer - Scheduling, execution and delivery pipeline

pub mod agent;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod delivery;
pub mod job_queue;
pub mod metric_extractor;
pub mod plugin_executor;
pub mod scheduler;
pub mod sender;
pub mod worker;

// Re-exports
pub use agent::{Agent, AgentDeps, RefreshHandle};
pub use clock::JobClock;
pub use config::AgentConfig;
pub use connectivity::ConnectivitySignal;
pub use delivery::{DeliveryCoordinator, DeliveryOutcome};
pub use job_queue::{JobQueue, QueueItem};
pub use metric_extractor::MetricExtractor;
pub use plugin_executor::PluginExecutor;
pub use scheduler::{ReconcileSummary, Scheduler};
pub use sender::Sender;
pub use worker::{
    execute_guarded, shutdown_channel, spawn_supervised, ConsumerPool, JobDispatcher,
    PanicGuardResult, ShutdownSender, ShutdownToken,
};
