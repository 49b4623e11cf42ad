//! SMS gateway channel — REST API client for the message provider.
//!
//! Maps provider responses onto the transport error taxonomy: opt-out
//! rejections are permanent and route to the reconciler, throttling and
//! server faults are retryable, everything else is undeliverable.

use async_trait::async_trait;
use keepsake_core::config::TransportConfig;
use keepsake_core::error::{KeepsakeError, Result};
use keepsake_core::traits::{DeliveryReceipt, Transport};

/// Provider error codes that identify the recipient as opted out.
const OPT_OUT_CODES: &[&str] = &["recipient-opted-out", "stop-list", "unsubscribed-recipient"];

/// SMS gateway client.
pub struct SmsGateway {
    config: TransportConfig,
    client: reqwest::Client,
}

impl SmsGateway {
    pub fn new(config: TransportConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

/// Classify a non-success provider response.
fn classify_failure(status: u16, code: Option<&str>, detail: &str) -> KeepsakeError {
    if code.is_some_and(|c| OPT_OUT_CODES.contains(&c)) {
        return KeepsakeError::RecipientOptedOut(detail.into());
    }
    match status {
        429 => KeepsakeError::RetryableProvider(format!("throttled: {detail}")),
        s if s >= 500 => KeepsakeError::RetryableProvider(format!("provider {s}: {detail}")),
        s => KeepsakeError::Undeliverable(format!("provider {s}: {detail}")),
    }
}

#[async_trait]
impl Transport for SmsGateway {
    fn name(&self) -> &str {
        "sms"
    }

    async fn send(&self, destination: &str, body: &str) -> Result<DeliveryReceipt> {
        let payload = serde_json::json!({
            "from": self.config.from_number,
            "to": destination,
            "body": body,
        });

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KeepsakeError::Timeout(format!("sms send to {destination}"))
                } else {
                    KeepsakeError::RetryableProvider(format!("sms send failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|v| v["code"].as_str().map(String::from));
            return Err(classify_failure(status.as_u16(), code.as_deref(), &raw));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KeepsakeError::Transport(format!("invalid provider response: {e}")))?;
        let message_id = json["id"]
            .as_str()
            .ok_or_else(|| KeepsakeError::Transport("provider response missing id".into()))?
            .to_string();

        tracing::debug!(destination, message_id, "sms accepted by provider");
        Ok(DeliveryReceipt { message_id })
    }
}
