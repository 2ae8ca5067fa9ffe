//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use harvest_ledger::LedgerConfig;

/// Service configuration loaded from environment variables and secrets files.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL connection URL. Without one the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10).
    pub max_connections: u32,

    /// Seconds between accrual ticks (default: 3600).
    pub accrual_interval_secs: u64,

    /// Per-call ledger timeout in milliseconds (default: 2000).
    pub call_timeout_ms: u64,

    /// Withdrawal approval timeout in milliseconds (default: 4000).
    pub approval_timeout_ms: u64,

    /// Webhook receiving operator notifications (optional).
    pub notify_webhook_url: Option<String>,

    /// Bearer token sent with webhook notifications (optional).
    pub notify_webhook_token: Option<String>,

    /// HS256 secret for user tokens (optional).
    pub jwt_secret: Option<String>,

    /// Expected token issuer (optional).
    pub jwt_issuer: Option<String>,
}

/// Secrets file structure.
#[derive(Debug, Default, Deserialize)]
struct HarvestSecrets {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    jwt_secret: Option<String>,
    #[serde(default)]
    notify_webhook_token: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let secrets = load_secrets();
        let defaults = Self::default();

        Self {
            database_url: secrets
                .database_url
                .or_else(|| std::env::var("DATABASE_URL").ok()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            accrual_interval_secs: env_parse("ACCRUAL_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.accrual_interval_secs),
            call_timeout_ms: env_parse("CALL_TIMEOUT_MS").unwrap_or(defaults.call_timeout_ms),
            approval_timeout_ms: env_parse("APPROVAL_TIMEOUT_MS")
                .unwrap_or(defaults.approval_timeout_ms),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            notify_webhook_token: secrets
                .notify_webhook_token
                .or_else(|| std::env::var("NOTIFY_WEBHOOK_TOKEN").ok()),
            jwt_secret: secrets
                .jwt_secret
                .or_else(|| std::env::var("JWT_SECRET").ok()),
            jwt_issuer: std::env::var("JWT_ISSUER").ok(),
        }
    }

    /// The ledger-level timeouts.
    #[must_use]
    pub const fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            approval_timeout: Duration::from_millis(self.approval_timeout_ms),
        }
    }

    /// Time between accrual ticks, never less than one second.
    #[must_use]
    pub const fn accrual_interval(&self) -> Duration {
        if self.accrual_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.accrual_interval_secs)
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            accrual_interval_secs: 3600,
            call_timeout_ms: 2000,
            approval_timeout_ms: 4000,
            notify_webhook_url: None,
            notify_webhook_token: None,
            jwt_secret: None,
            jwt_issuer: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load secrets from the first secrets file found, or nothing.
fn load_secrets() -> HarvestSecrets {
    let secret_paths = [".secrets/harvest.json", "../.secrets/harvest.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<HarvestSecrets>(path) {
            tracing::info!(path = %path, "Loaded secrets from file");
            return secrets;
        }
    }

    tracing::debug!("Secrets file not found, using environment variables");
    HarvestSecrets::default()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.accrual_interval(), Duration::from_secs(3600));

        let ledger = config.ledger();
        assert_eq!(ledger.call_timeout, Duration::from_secs(2));
        assert_eq!(ledger.approval_timeout, Duration::from_secs(4));
        assert_eq!(ledger, LedgerConfig::default());
    }

    #[test]
    fn zero_accrual_interval_is_raised() {
        let config = ServiceConfig {
            accrual_interval_secs: 0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.accrual_interval(), Duration::from_secs(1));
    }

    #[test]
    fn secrets_file_fields_are_optional() {
        let secrets: HarvestSecrets = serde_json::from_str(r#"{"jwt_secret": "s3cret"}"#).unwrap();
        assert_eq!(secrets.jwt_secret.as_deref(), Some("s3cret"));
        assert!(secrets.database_url.is_none());
        assert!(secrets.notify_webhook_token.is_none());
    }

    #[test]
    fn missing_secrets_file_is_not_found() {
        let err = load_secrets_file::<HarvestSecrets>("does/not/exist.json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
