use crate::config::BackendConfig;
use crate::types::{WebhookPayload, WebhookResponse};
use reqwest::{Client, StatusCode};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("webhook request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Backend { status: StatusCode, body: String },
}

/// Delivers one inbound-message payload to the backend webhook. A single
/// bounded-timeout POST, no retries; failures feed the fallback-reply path.
pub struct WebhookRelay {
    http: Client,
    url: String,
    timeout: Duration,
}

impl WebhookRelay {
    pub fn new(http: Client, backend: &BackendConfig) -> Self {
        let url = format!(
            "{}{}",
            backend.url.trim_end_matches('/'),
            backend.webhook_path
        );
        Self {
            http,
            url,
            timeout: Duration::from_secs(backend.request_timeout_seconds),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<WebhookResponse, RelayError> {
        let resp = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Backend { status, body });
        }

        Ok(resp.json::<WebhookResponse>().await?)
    }
}
