// system_metrics plugin - host CPU, memory and disk usage via sysinfo

use outpost_core::port::{Plugin, PluginError};
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Disks, System};
use tracing::debug;

pub const SYSTEM_METRICS_PLUGIN: &str = "system_metrics";

const MB: u64 = 1024 * 1024;

/// Keeps one `System` so CPU usage is measured between consecutive collections
pub struct SystemMetricsPlugin {
    system: Mutex<System>,
}

impl SystemMetricsPlugin {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for SystemMetricsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SystemMetricsPlugin {
    fn name(&self) -> &str {
        SYSTEM_METRICS_PLUGIN
    }

    fn collect(&self) -> Result<Value, PluginError> {
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_usage_percent = sys.global_cpu_info().cpu_usage();
        let memory_used_mb = sys.used_memory() / MB;
        let memory_total_mb = sys.total_memory() / MB;

        let disks: Vec<Value> = Disks::new_with_refreshed_list()
            .iter()
            .map(|disk| {
                let total = disk.total_space() / MB;
                let available = disk.available_space() / MB;
                json!({
                    "mount": disk.mount_point().to_string_lossy(),
                    "total_mb": total,
                    "used_mb": total.saturating_sub(available),
                })
            })
            .collect();

        debug!(
            cpu = %cpu_usage_percent,
            mem_used_mb = memory_used_mb,
            disks = disks.len(),
            "Collected system metrics"
        );

        Ok(json!({
            "cpu_usage_percent": cpu_usage_percent,
            "memory_used_mb": memory_used_mb,
            "memory_total_mb": memory_total_mb,
            "disks": disks,
        }))
    }
}
