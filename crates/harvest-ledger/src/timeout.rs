use std::future::Future;
use std::time::Duration;

use harvest_core::{LedgerError, Result};

/// Run `call` under `limit`. Elapsed becomes `LedgerError::Transient`.
///
/// The future is dropped on expiry, so any open transaction rolls back.
pub(crate) async fn within<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    if let Ok(result) = tokio::time::timeout(limit, call).await {
        result
    } else {
        tracing::warn!(
            operation,
            timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            "Ledger call timed out"
        );
        Err(LedgerError::Transient(format!(
            "{operation} timed out after {limit:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_call_is_transient() {
        let err = within(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn finished_call_passes_through() {
        let value = within(Duration::from_secs(1), "fast", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
