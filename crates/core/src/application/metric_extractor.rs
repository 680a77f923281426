// Metric Extractor - reads declared metrics out of command output
//
// Each metric is a regex; the captured text must parse as a number.
// Cumulative metrics report the change since the previous run of the same
// activity (0 on first sight). Extraction checks an explicit deadline between
// metrics and skips whatever is left once it passes.

use crate::domain::{ActivityId, Job, MetricDefinition, MetricId, MetricValues};
use regex::RegexBuilder;
use serde_json::Number;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Compiled program size cap for a metric pattern (1 MiB)
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

pub struct MetricExtractor {
    timeout: Duration,
    /// Last raw value of every cumulative metric
    previous: Mutex<HashMap<(ActivityId, MetricId), Number>>,
}

impl MetricExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Values for the job's metrics; None when nothing could be extracted
    pub fn extract(&self, job: &Job, output: &str) -> Option<MetricValues> {
        self.extract_until(job, output, Instant::now() + self.timeout)
    }

    pub fn extract_until(
        &self,
        job: &Job,
        output: &str,
        deadline: Instant,
    ) -> Option<MetricValues> {
        if job.metrics.is_empty() {
            return None;
        }

        let mut values = MetricValues::new();

        for (index, (id, definition)) in job.metrics.iter().enumerate() {
            if Instant::now() > deadline {
                warn!(
                    job = %job,
                    skipped = job.metrics.len() - index,
                    "Metric extraction deadline passed, skipping remaining metrics"
                );
                break;
            }

            let raw = match read_metric(definition, output) {
                Ok(raw) => raw,
                Err(reason) => {
                    warn!(job = %job, metric = %id, reason = %reason, "Failed to extract metric");
                    continue;
                }
            };

            let value = if definition.cumulative {
                self.delta(&job.activity_id, id, raw.clone())
            } else {
                Some(raw.clone())
            };
            match value {
                Some(value) => {
                    debug!(job = %job, metric = %id, raw = %raw, value = %value, "Metric read");
                    values.insert(id.clone(), value);
                }
                None => warn!(job = %job, metric = %id, "Metric delta is not a finite number"),
            }
        }

        (!values.is_empty()).then_some(values)
    }

    /// Change since the last value seen for this metric; records `current`
    fn delta(&self, activity_id: &str, metric_id: &str, current: Number) -> Option<Number> {
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (activity_id.to_string(), metric_id.to_string());
        let delta = match previous.get(&key) {
            Some(last) => subtract(&current, last),
            None => Some(Number::from(0)),
        };
        previous.insert(key, current);
        delta
    }

    /// Drop remembered values of activities that are gone
    pub fn retain_activities(&self, keep: &[ActivityId]) {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(activity_id, _), _| keep.contains(activity_id));
    }
}

fn read_metric(definition: &MetricDefinition, output: &str) -> Result<Number, String> {
    let regex = RegexBuilder::new(&definition.pattern)
        .multi_line(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| format!("invalid pattern: {}", e))?;

    let captures = regex
        .captures(output)
        .ok_or_else(|| "pattern did not match".to_string())?;
    let text = captures
        .name("value")
        .or_else(|| captures.get(1))
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().trim())
        .unwrap_or_default();

    parse_number(text).ok_or_else(|| format!("{:?} is not a number", text))
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Number::from(integer));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn subtract(current: &Number, last: &Number) -> Option<Number> {
    if let (Some(current), Some(last)) = (current.as_i64(), last.as_i64()) {
        if let Some(delta) = current.checked_sub(last) {
            return Some(Number::from(delta));
        }
    }
    let delta = current.as_f64()? - last.as_f64()?;
    Number::from_f64(delta)
}
