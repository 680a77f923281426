// HTTP Transport
//
// POST {base}/agents/1/data/activities/{activity_id} with the result payload as JSON.
// 2xx -> Success, 5xx -> NoService, 409/400/404 -> Conflict (permanent rejection).
// Everything else, including 401/403/408/429 and request errors, is NotConnected
// so the result is kept and retried.

use async_trait::async_trait;
use outpost_core::domain::ResultPayload;
use outpost_core::error::{AppError, Result};
use outpost_core::port::{DeliveryStatus, Transport};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, activity_id: &str) -> String {
        format!("{}/agents/1/data/activities/{}", self.base_url, activity_id)
    }
}

/// Map a response status to a delivery outcome
pub fn classify(status: StatusCode) -> DeliveryStatus {
    match status {
        s if s.is_success() => DeliveryStatus::Success,
        s if s.is_server_error() => DeliveryStatus::NoService,
        StatusCode::CONFLICT | StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            DeliveryStatus::Conflict
        }
        _ => DeliveryStatus::NotConnected,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, activity_id: &str, payload: &ResultPayload) -> DeliveryStatus {
        let url = self.endpoint(activity_id);
        let response = match self.client.post(&url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Delivery failed, server unreachable");
                return DeliveryStatus::NotConnected;
            }
        };

        let status = classify(response.status());
        if status != DeliveryStatus::Success {
            warn!(
                activity_id = %activity_id,
                http_status = response.status().as_u16(),
                outcome = %status,
                "Server did not accept result"
            );
        }
        status
    }
}
