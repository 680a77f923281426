// Transport Port
// Delivers one result payload to the server for an activity

use crate::domain::ResultPayload;
use async_trait::async_trait;

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    /// Server unreachable, or not accepting this agent's data right now (auth, throttling)
    NotConnected,
    /// Server reachable but unable to serve (5xx)
    NoService,
    /// Server rejected the result for good; the agent's activity list may be stale
    Conflict,
}

impl DeliveryStatus {
    /// Whether the result should be kept for a later retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryStatus::NotConnected | DeliveryStatus::NoService)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Success => write!(f, "SUCCESS"),
            DeliveryStatus::NotConnected => write!(f, "NOT_CONNECTED"),
            DeliveryStatus::NoService => write!(f, "NO_SERVICE"),
            DeliveryStatus::Conflict => write!(f, "CONFLICT"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, activity_id: &str, payload: &ResultPayload) -> DeliveryStatus;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: pops queued statuses, then falls back to a default
    pub struct MockTransport {
        scripted: Mutex<VecDeque<DeliveryStatus>>,
        default: Mutex<DeliveryStatus>,
        attempts: Mutex<Vec<(String, ResultPayload, DeliveryStatus)>>,
    }

    impl MockTransport {
        pub fn new(default: DeliveryStatus) -> Self {
            Self {
                scripted: Mutex::new(VecDeque::new()),
                default: Mutex::new(default),
                attempts: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(DeliveryStatus::Success)
        }

        pub fn push_status(&self, status: DeliveryStatus) {
            self.scripted.lock().unwrap().push_back(status);
        }

        pub fn set_default(&self, status: DeliveryStatus) {
            *self.default.lock().unwrap() = status;
        }

        /// Every attempt with the status it got
        pub fn attempts(&self) -> Vec<(String, ResultPayload, DeliveryStatus)> {
            self.attempts.lock().unwrap().clone()
        }

        /// Payloads that were accepted
        pub fn delivered(&self) -> Vec<(String, ResultPayload)> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, _, status)| *status == DeliveryStatus::Success)
                .map(|(id, payload, _)| (id.clone(), payload.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn deliver(&self, activity_id: &str, payload: &ResultPayload) -> DeliveryStatus {
            let status = self
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| *self.default.lock().unwrap());
            self.attempts
                .lock()
                .unwrap()
                .push((activity_id.to_string(), payload.clone(), status));
            status
        }
    }
}
