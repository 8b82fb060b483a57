//! Error types for the guard.
//!
//! Only [`ConfigError`] is fatal. Every other failure is turned into a value:
//! credential problems degrade to an anonymous [`Principal`](crate::Principal),
//! denials become [`AccessDenied`] and are rendered as an
//! [`ErrorEnvelope`](crate::ErrorEnvelope), and codec problems are recovered
//! inside the [`EnvelopeCodec`](crate::EnvelopeCodec).

use crate::engine::{Decision, DecisionReason};
use crate::failure::{ApiFailure, FailureResponse};
use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode};
use std::fmt;

/// Error code carried by 401 denials.
pub const AUTHENTICATION_REQUIRED_CODE: &str = "AUTHENTICATION_REQUIRED";

/// Error code carried by 403 denials.
pub const ACCESS_DENIED_CODE: &str = "ACCESS_DENIED";

/// Invalid configuration. The guard must not serve traffic after this.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Invalid path pattern.
    #[error("Invalid path pattern '{0}': {1}")]
    InvalidPattern(String, String),

    /// Invalid IP pattern.
    #[error("Invalid IP pattern '{0}': {1}")]
    InvalidIp(String, String),

    /// Invalid HTTP method.
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// A rule that can never be satisfied or is otherwise malformed.
    #[error("Invalid rule #{index} ({pattern}): {reason}")]
    InvalidRule {
        /// Position of the rule in configuration order.
        index: usize,
        /// The rule's path pattern.
        pattern: String,
        /// What is wrong with it.
        reason: String,
    },

    /// `restricted` has no grants when used as the default mode.
    #[error("Default access mode 'restricted' would deny every unmatched request; use 'deny_all'")]
    RestrictedDefault,

    /// Invalid claim-path expression.
    #[error("Invalid claim path '{0}': {1}")]
    InvalidClaimPath(String, String),

    /// Invalid stored password for a configured user.
    #[error("Invalid password for user '{user}': {reason}")]
    InvalidPassword {
        /// The user name.
        user: String,
        /// What is wrong with the stored value.
        reason: String,
    },

    /// Invalid HTTP status code in a status mapping.
    #[error("Invalid status code {0}")]
    InvalidStatus(u16),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Returned by a [`TokenVerifier`](crate::TokenVerifier) that cannot verify a
/// bearer credential. Never propagated past authentication.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerificationError {
    /// The token is not well formed.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The token is expired or not yet valid.
    #[error("Token expired or not yet valid")]
    Expired,

    /// The signature could not be verified.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Any other verifier failure.
    #[error("Token rejected: {0}")]
    Rejected(String),
}

/// Internal JSON/XML failure inside the codec. Recovered by the fallback chain.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// XML reading or writing failed.
    #[error("XML: {0}")]
    Xml(String),
}

/// A request refused by the authorization engine.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    /// The path that was requested.
    pub path: String,
    /// The request method.
    pub method: Method,
    /// The principal name, if the caller was authenticated.
    pub principal: Option<String>,
    /// Why the engine refused.
    pub reason: DecisionReason,
}

impl AccessDenied {
    /// Create a denial from a refusing decision.
    pub fn from_decision(
        decision: &Decision<'_>,
        path: impl Into<String>,
        method: Method,
        principal: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method,
            principal,
            reason: decision.reason,
        }
    }

    /// Whether the caller has to authenticate first (401) rather than being
    /// forbidden (403).
    pub fn requires_authentication(&self) -> bool {
        self.reason == DecisionReason::Unauthenticated
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requires_authentication() {
            f.write_str("Authentication required")
        } else {
            f.write_str("Access denied")
        }
    }
}

impl std::error::Error for AccessDenied {}

impl ApiFailure for AccessDenied {
    fn status(&self) -> Option<StatusCode> {
        if self.requires_authentication() {
            Some(StatusCode::UNAUTHORIZED)
        } else {
            Some(StatusCode::FORBIDDEN)
        }
    }

    fn error_code(&self) -> Option<&str> {
        if self.requires_authentication() {
            Some(AUTHENTICATION_REQUIRED_CODE)
        } else {
            Some(ACCESS_DENIED_CODE)
        }
    }
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        FailureResponse::new(self).into_response()
    }
}
