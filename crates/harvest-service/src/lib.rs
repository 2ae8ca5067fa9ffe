//! Harvest service.
//!
//! Wires the ledgers to their outside collaborators:
//!
//! - [`ServiceConfig`]: built once at startup and passed by reference
//! - [`WebhookNotifier`]: operator notifications over HTTP
//! - [`JwtIdentity`]: maps a bearer credential to the acting user
//!
//! The binary opens the store, applies migrations and runs the accrual
//! scheduler until it receives ctrl-c.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod auth;
pub mod config;
pub mod notify;

pub use auth::{AuthError, IdentityVerifier, JwtClaims, JwtIdentity};
pub use config::ServiceConfig;
pub use notify::{notifier_from_config, WebhookNotifier};
