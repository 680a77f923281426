// Port Layer - Interfaces for external dependencies

pub mod command_executor;
pub mod error_reporter;
pub mod offline_store;
pub mod plugin;
pub mod registry;
pub mod time_provider; // For deterministic testing
pub mod transport;

// Re-exports
pub use command_executor::{CommandExecutor, ExecutionError};
pub use error_reporter::{ErrorReporter, TaskOutcome, TracingErrorReporter};
pub use offline_store::OfflineStore;
pub use plugin::{Plugin, PluginError, PluginRegistry};
pub use registry::Registry;
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transport::{DeliveryStatus, Transport};
