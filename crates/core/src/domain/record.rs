// Result payloads and offline records

use super::activity::{ActivityId, MetricId};
use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BLOCKED_MESSAGE: &str = "Command blocked by whitelist.";
pub const TIMEOUT_MESSAGE: &str = "Command exceeded timeout.";
pub const UNRESOLVED_MESSAGE: &str = "Failed to retrieve execution status.";
pub const EMPTY_OUTPUT_MESSAGE: &str = "No output/error produced";
pub const UNREADABLE_OUTPUT_MESSAGE: &str = "Could not read output";

/// Maximum stored length of an activity id
pub const MAX_ACTIVITY_ID_LEN: usize = 50;

/// Result data: raw text from a command or a structured plugin value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultData {
    Text(String),
    Structured(serde_json::Value),
}

impl From<serde_json::Value> for ResultData {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => ResultData::Text(text),
            other => ResultData::Structured(other),
        }
    }
}

/// Metric values extracted from a job's output
pub type MetricValues = BTreeMap<MetricId, serde_json::Number>;

/// What gets sent to the server for a single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub timestamp: i64,
    pub return_code: i32,
    pub data: ResultData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricValues>,
}

impl ResultPayload {
    pub fn text(timestamp: i64, return_code: i32, text: impl Into<String>) -> Self {
        Self::new(timestamp, return_code, ResultData::Text(text.into()))
    }

    pub fn new(timestamp: i64, return_code: i32, data: ResultData) -> Self {
        Self {
            timestamp,
            return_code,
            data,
            metrics: None,
        }
    }

    /// Attach metrics; an empty set is left out
    pub fn with_metrics(mut self, metrics: Option<MetricValues>) -> Self {
        self.metrics = metrics.filter(|values| !values.is_empty());
        self
    }
}

/// A result waiting in the offline queue
///
/// Unique per (activity, timestamp). `row_id` is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineRecord {
    pub row_id: Option<i64>,
    pub activity: ActivityId,
    pub timestamp: i64,
    pub return_code: i32,
    /// JSON-encoded `ResultData`
    pub output: Vec<u8>,
    /// JSON-encoded `MetricValues`
    pub metrics: Option<Vec<u8>>,
}

impl OfflineRecord {
    pub fn from_payload(activity: &str, payload: &ResultPayload) -> Result<Self> {
        if activity.is_empty() || activity.len() > MAX_ACTIVITY_ID_LEN {
            return Err(DomainError::ValidationError(format!(
                "activity id must be 1..={} bytes, got {}",
                MAX_ACTIVITY_ID_LEN,
                activity.len()
            )));
        }

        let output = serde_json::to_vec(&payload.data)
            .map_err(|e| DomainError::ValidationError(format!("unencodable result: {}", e)))?;
        let metrics = payload
            .metrics
            .as_ref()
            .filter(|values| !values.is_empty())
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| DomainError::ValidationError(format!("unencodable metrics: {}", e)))?;

        Ok(Self {
            row_id: None,
            activity: activity.to_string(),
            timestamp: payload.timestamp,
            return_code: payload.return_code,
            output,
            metrics,
        })
    }

    /// Rebuild the payload
    ///
    /// Undecodable output is passed through as lossy text, undecodable metrics are dropped.
    pub fn to_payload(&self) -> ResultPayload {
        let data = serde_json::from_slice::<ResultData>(&self.output).unwrap_or_else(|_| {
            ResultData::Text(String::from_utf8_lossy(&self.output).into_owned())
        });
        let metrics = self
            .metrics
            .as_deref()
            .and_then(|raw| serde_json::from_slice::<MetricValues>(raw).ok());

        ResultPayload::new(self.timestamp, self.return_code, data).with_metrics(metrics)
    }
}
