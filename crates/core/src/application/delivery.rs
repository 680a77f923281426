// Delivery Coordinator - turns finished jobs into results and routes them
//
// Direct delivery first; on transient failure the result goes to the offline
// queue and the sender is woken. Conflicts are dropped and ask for a registry
// refresh; ignored jobs are skipped. Metrics are read from real output only.

use super::agent::RefreshHandle;
use super::metric_extractor::MetricExtractor;
use super::sender::Sender;
use crate::domain::{
    Job, JobOutput, JobStatus, OfflineRecord, ResultData, ResultPayload, BLOCKED_MESSAGE,
    EMPTY_OUTPUT_MESSAGE, TIMEOUT_MESSAGE, UNREADABLE_OUTPUT_MESSAGE, UNRESOLVED_MESSAGE,
};
use crate::port::{DeliveryStatus, OfflineStore, Transport};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// What happened to a job's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
    Dropped,
    /// No result to deliver (ignored job)
    Skipped,
}

pub struct DeliveryCoordinator {
    transport: Arc<dyn Transport>,
    offline_store: Arc<dyn OfflineStore>,
    sender: Sender,
    refresh: RefreshHandle,
    extractor: Arc<MetricExtractor>,
    output_read_limit: u64,
}

impl DeliveryCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        offline_store: Arc<dyn OfflineStore>,
        sender: Sender,
        refresh: RefreshHandle,
        extractor: Arc<MetricExtractor>,
        output_read_limit: u64,
    ) -> Self {
        Self {
            transport,
            offline_store,
            sender,
            refresh,
            extractor,
            output_read_limit,
        }
    }

    pub async fn complete(&self, job: Job) -> DeliveryOutcome {
        let Some(payload) = self.build_payload(&job).await else {
            debug!(job = %job, status = %job.status, "No result to deliver");
            return DeliveryOutcome::Skipped;
        };

        match self.transport.deliver(&job.activity_id, &payload).await {
            DeliveryStatus::Success => {
                debug!(job = %job, "Result delivered");
                DeliveryOutcome::Delivered
            }
            DeliveryStatus::Conflict => {
                warn!(job = %job, "Conflicting result dropped, refreshing activities");
                self.refresh.refresh();
                DeliveryOutcome::Dropped
            }
            status => {
                debug!(job = %job, status = %status, "Direct delivery failed, queueing offline");
                self.enqueue(&job.activity_id, &payload).await
            }
        }
    }

    async fn enqueue(&self, activity_id: &str, payload: &ResultPayload) -> DeliveryOutcome {
        let record = match OfflineRecord::from_payload(activity_id, payload) {
            Ok(record) => record,
            Err(e) => {
                error!(activity_id = %activity_id, error = %e, "Cannot store result offline");
                return DeliveryOutcome::Dropped;
            }
        };

        if self.offline_store.insert(record).await {
            self.sender.notify();
            DeliveryOutcome::Queued
        } else {
            warn!(
                activity_id = %activity_id,
                timestamp = payload.timestamp,
                "Offline queue did not accept result"
            );
            DeliveryOutcome::Dropped
        }
    }

    /// Result for a job, or None for jobs that produce none
    ///
    /// Output files are read once (capped) and removed.
    pub async fn build_payload(&self, job: &Job) -> Option<ResultPayload> {
        let timestamp = job.result_timestamp();

        let payload = match job.status {
            JobStatus::Ignored | JobStatus::Initialized => None,
            JobStatus::Blocked => Some(ResultPayload::text(timestamp, 0, BLOCKED_MESSAGE)),
            JobStatus::TimedOut => Some(ResultPayload::text(timestamp, 0, TIMEOUT_MESSAGE)),
            JobStatus::Running => {
                warn!(job = %job, "Execution status unresolved");
                Some(ResultPayload::text(timestamp, 0, UNRESOLVED_MESSAGE))
            }
            JobStatus::Finished => {
                let mut metrics = None;
                let data = match &job.output {
                    JobOutput::File(path) => match self.read_output(path).await {
                        Ok(text) => {
                            metrics = self.extractor.extract(job, &text);
                            ResultData::Text(text)
                        }
                        Err(message) => ResultData::Text(message.to_string()),
                    },
                    JobOutput::Value(value) => ResultData::from(value.clone()),
                    JobOutput::Failure(reason) => ResultData::Text(reason.clone()),
                    JobOutput::None => {
                        error!(job = %job, "Finished job has no output");
                        ResultData::Text(EMPTY_OUTPUT_MESSAGE.to_string())
                    }
                };
                Some(ResultPayload::new(timestamp, job.return_code, data).with_metrics(metrics))
            }
        };

        if let Some(path) = job.output_path() {
            remove_output(path).await;
        }
        payload
    }

    /// Captured output, or the placeholder message when there is none
    async fn read_output(&self, path: &Path) -> Result<String, &'static str> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to open output file");
                return Err(UNREADABLE_OUTPUT_MESSAGE);
            }
        };

        let mut buf = Vec::new();
        if let Err(e) = file.take(self.output_read_limit).read_to_end(&mut buf).await {
            error!(path = %path.display(), error = %e, "Failed to read output file");
            return Err(UNREADABLE_OUTPUT_MESSAGE);
        }

        if buf.is_empty() {
            Err(EMPTY_OUTPUT_MESSAGE)
        } else {
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }
    }
}

async fn remove_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => info!(path = %path.display(), error = %e, "Failed to remove output file"),
    }
}
