// Activity Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Activity identifier (opaque, assigned by the server)
pub type ActivityId = String;

pub type MetricId = String;

/// A number read out of a command's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Multi-line regex run against the output; the `value` group (else group 1,
    /// else the whole match) holds the number
    pub pattern: String,
    /// Report the change since the previous run instead of the value itself
    #[serde(default)]
    pub cumulative: bool,
}

pub type MetricDefinitions = BTreeMap<MetricId, MetricDefinition>;

/// How an activity is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Shell command run by the persistent command executor
    #[default]
    Command,
    /// In-process collector; `command` holds the plugin name
    Plugin,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Command => write!(f, "COMMAND"),
            ActivityKind::Plugin => write!(f, "PLUGIN"),
        }
    }
}

/// A unit of monitoring work definition, executed every `interval` seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(alias = "_id")]
    pub id: ActivityId,
    #[serde(default)]
    pub name: String,
    pub command: String,
    /// Seconds between executions
    pub interval: u64,
    #[serde(default, alias = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: MetricDefinitions,
}

impl Activity {
    pub fn new(
        id: impl Into<ActivityId>,
        name: impl Into<String>,
        command: impl Into<String>,
        interval: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: command.into(),
            interval,
            kind: ActivityKind::Command,
            metrics: MetricDefinitions::new(),
        }
    }

    pub fn with_metric(
        mut self,
        id: impl Into<MetricId>,
        pattern: impl Into<String>,
        cumulative: bool,
    ) -> Self {
        self.metrics.insert(
            id.into(),
            MetricDefinition {
                pattern: pattern.into(),
                cumulative,
            },
        );
        self
    }

    pub fn plugin(
        id: impl Into<ActivityId>,
        name: impl Into<String>,
        plugin_name: impl Into<String>,
        interval: u64,
    ) -> Self {
        Self {
            kind: ActivityKind::Plugin,
            ..Self::new(id, name, plugin_name, interval)
        }
    }

    pub fn is_plugin(&self) -> bool {
        self.kind == ActivityKind::Plugin
    }

    pub fn interval_millis(&self) -> i64 {
        (self.interval as i64).saturating_mul(1000)
    }

    /// Whether a re-registered definition differs in anything that affects execution
    ///
    /// Metric definitions only change how output is read, not when it runs.
    pub fn differs_from(&self, other: &Activity) -> bool {
        self.command != other.command
            || self.interval != other.interval
            || self.kind != other.kind
    }
}
