//! Webhook operator notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use harvest_ledger::{LogNotifier, Notifier, NotifyError};

use crate::config::ServiceConfig;

/// Timeout for one webhook delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Posts operator notifications as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookNotifier {
    /// Deliver to `url`, authenticating with `token` when given.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_operator_notification(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, body });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Webhook delivery failed");
            NotifyError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, url = %self.url, "Webhook returned non-success status");
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(subject = %subject, "Webhook notification delivered");
        Ok(())
    }
}

/// The webhook notifier when one is configured, the log notifier otherwise.
pub fn notifier_from_config(config: &ServiceConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.notify_webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            config.notify_webhook_token.clone(),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
