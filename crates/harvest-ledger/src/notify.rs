//! Operator notifications.
//!
//! Notifications go out after the money-moving write has committed. A failed
//! notification is logged and never fails or retries the operation.

use std::sync::Arc;

use async_trait::async_trait;

/// Errors a notifier can report.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The notification could not be delivered.
    #[error("notification transport failed: {0}")]
    Transport(String),

    /// The receiving end refused the notification.
    #[error("notification rejected with status {status}")]
    Rejected {
        /// Status code returned by the receiver.
        status: u16,
    },
}

/// Delivers operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification to the operators.
    async fn send_operator_notification(&self, subject: &str, body: &str)
        -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_operator_notification(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(subject = %subject, body = %body, "Operator notification");
        Ok(())
    }
}

/// Send a notification in the background, logging a failure.
pub(crate) fn dispatch(notifier: &Arc<dyn Notifier>, subject: String, body: String) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.send_operator_notification(&subject, &body).await {
            tracing::warn!(error = %e, subject = %subject, "Operator notification failed");
        }
    });
}
