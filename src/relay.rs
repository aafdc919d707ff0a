//! Outbound webhook relay.
//!
//! Fire-and-forget: one POST per call, no timeout, no retry. Delivery is
//! confirmed only by the immediate HTTP status.

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::types::{EventKind, SendOutcome, TestReport, WebhookEnvelope};

/// Skips the interstitial warning page ngrok serves to unknown clients.
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

pub const TEST_MESSAGE: &str = "Test webhook from Smart Kissan";
pub const TEST_SOURCE: &str = "smart_kissan_app";

#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl RelayClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send a `test_connection` envelope and return the endpoint's JSON reply.
    pub async fn send_test(&self, url: &str) -> Result<Value, RelayError> {
        let data = json!({
            "message": TEST_MESSAGE,
            "timestamp": Utc::now().to_rfc3339(),
            "source": TEST_SOURCE,
        });
        let envelope = WebhookEnvelope::new(EventKind::TestConnection, data);

        let resp = self.post(url, &envelope).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::Transport {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))
    }

    /// [`send_test`](Self::send_test) folded into a display-ready report.
    pub async fn test_connection(&self, url: &str) -> TestReport {
        match self.send_test(url).await {
            Ok(data) => TestReport {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => {
                warn!(url, error = %e, "Webhook test error");
                TestReport {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn send_crop_update(&self, data: Value, url: &str) -> SendOutcome {
        self.send(EventKind::CropUpdate, data, url).await
    }

    pub async fn send_weather_alert(&self, data: Value, url: &str) -> SendOutcome {
        self.send(EventKind::WeatherAlert, data, url).await
    }

    /// Relay `data` verbatim under `kind`. Never fails; the outcome carries the reason.
    pub async fn send(&self, kind: EventKind, data: Value, url: &str) -> SendOutcome {
        let envelope = WebhookEnvelope::new(kind, data);
        let outcome = match self.post(url, &envelope).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    SendOutcome::delivered(status.as_u16())
                } else {
                    SendOutcome::failed(Some(status.as_u16()), status.to_string())
                }
            }
            Err(e) => SendOutcome::failed(None, e.to_string()),
        };

        if outcome.delivered {
            debug!(event = %kind, url, "Webhook delivered");
        } else {
            warn!(
                event = %kind,
                url,
                reason = outcome.reason.as_deref().unwrap_or_default(),
                "Webhook send failed"
            );
        }
        outcome
    }

    async fn post(
        &self,
        url: &str,
        envelope: &WebhookEnvelope,
    ) -> Result<reqwest::Response, RelayError> {
        self.client
            .post(url)
            .headers(relay_headers())
            .json(envelope)
            .send()
            .await
            .map_err(|e| RelayError::Connectivity(e.to_string()))
    }
}

fn relay_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(TUNNEL_BYPASS_HEADER, HeaderValue::from_static("true"));
    headers
}
