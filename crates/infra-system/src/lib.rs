// Outpost Infrastructure - System Adapters
// Implements: CommandExecutor (persistent shell), Plugin (system_metrics), Registry (JSON file)

pub mod file_registry;
pub mod process_signal;
pub mod shell_executor;
pub mod shell_protocol;
pub mod system_metrics_plugin;

pub use file_registry::FileRegistry;
pub use shell_executor::{ShellExecutor, ShellExecutorConfig};
pub use system_metrics_plugin::{SystemMetricsPlugin, SYSTEM_METRICS_PLUGIN};
