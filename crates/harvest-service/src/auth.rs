//! Identity verification.
//!
//! The ledgers trust the user id handed to them. This module turns a bearer
//! credential into that id.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use harvest_core::UserId;

use crate::config::ServiceConfig;

/// Errors from identity verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential, or not a bearer credential.
    #[error("missing bearer credential")]
    MissingCredential,

    /// The token failed signature, expiry or issuer checks.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token subject is not a user id.
    #[error("token subject is not a user id: {0}")]
    InvalidSubject(String),

    /// Identity verification is not configured.
    #[error("identity verification is not configured")]
    NotConfigured,
}

/// Resolves the acting user from a bearer credential.
pub trait IdentityVerifier: Send + Sync {
    /// The user the credential belongs to.
    fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// JWT claims for user tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies HS256 user tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtIdentity {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    /// Verify tokens signed with `secret`, optionally requiring `issuer`.
    #[must_use]
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Build from the service configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, AuthError> {
        let secret = config.jwt_secret.as_ref().ok_or(AuthError::NotConfigured)?;
        Ok(Self::new(secret.as_bytes(), config.jwt_issuer.as_deref()))
    }
}

impl IdentityVerifier for JwtIdentity {
    fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        let credential = credential.trim();
        let token = match credential.strip_prefix("Bearer ") {
            Some(rest) => rest.trim_start(),
            None if credential == "Bearer" => "",
            None => credential,
        };
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            AuthError::from(e)
        })?;

        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidSubject(data.claims.sub))
    }
}
