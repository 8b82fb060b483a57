//! # axum-guard
//!
//! Request authorization and error rendering middleware for [axum](https://docs.rs/axum) 0.8.
//!
//! Every request passes through the same fixed pipeline:
//! - **Authenticate**: a bearer token (verified by your [`TokenVerifier`]) or
//!   basic credentials (checked against an [`IdentityStore`]) become a
//!   [`Principal`]. Bad credentials degrade to an anonymous principal.
//! - **Authorize**: an ordered list of [`AccessRule`]s is searched for the
//!   first rule matching the path and method. The rule permits, denies, or
//!   grants access by role or by source address.
//! - **Render failures**: denials and handler failures become an
//!   [`ErrorEnvelope`] encoded as JSON, XML or plain text with headers,
//!   depending on the request's `Accept` header.
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_guard::{Guard, Principal, SecurityConfig};
//! use std::net::SocketAddr;
//!
//! const CONFIG: &str = r#"
//! [auth]
//! default_mode = "deny_all"
//!
//! [[auth.rules]]
//! pattern = "/public/**"
//! mode = "permit_all"
//!
//! [[auth.rules]]
//! pattern = "/protected/**"
//! roles = ["USER"]
//!
//! [[auth.basic_users]]
//! name = "alice"
//! password = "{noop}secret"
//! roles = ["USER"]
//! "#;
//!
//! async fn public_handler() -> &'static str {
//!     "Public content"
//! }
//!
//! async fn protected_handler(principal: Principal) -> String {
//!     format!("Hello, {}", principal.name().unwrap_or("stranger"))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = Guard::from_config(SecurityConfig::from_toml(CONFIG).unwrap()).unwrap();
//!
//!     let app = Router::new()
//!         .route("/public/info", get(public_handler))
//!         .route("/protected/me", get(protected_handler))
//!         .layer(guard.layer());
//!
//!     // Use into_make_service_with_connect_info for IP grants
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>()
//!     ).await.unwrap();
//! }
//! ```
//!
//! ## Rule Evaluation
//!
//! Rules are checked in configuration order and the first rule whose pattern
//! and method match decides:
//! - `permit_all`: allowed, regardless of identity
//! - `deny_all`: denied (403), regardless of identity
//! - `restricted`: anonymous callers get 401; authenticated callers are
//!   allowed if they hold any listed role or their address is in the allow
//!   list, otherwise 403
//!
//! When no rule matches, the default mode applies (`deny_all` unless
//! configured otherwise).
//!
//! ```
//! use axum_guard::{AccessMode, AccessRule, AuthorizationEngine, PathPattern, Principal, RuleSet};
//! use http::Method;
//!
//! let rules = RuleSet::builder()
//!     .default_mode(AccessMode::PermitAll)
//!     .add_rule(AccessRule::restricted(PathPattern::parse("/admin/**").unwrap()).role("ADMIN"))
//!     .build_shared()
//!     .unwrap();
//! let engine = AuthorizationEngine::new(rules);
//!
//! let admin = Principal::authenticated("root", ["ROLE_ADMIN"]);
//! assert!(engine.decide("/admin/users", &Method::DELETE, &admin).allowed);
//! assert!(engine.decide("/anything", &Method::GET, &Principal::anonymous()).allowed);
//! ```
//!
//! ## Path Patterns
//!
//! - `*` matches exactly one path segment
//! - `**` matches zero or more path segments
//! - everything else compares literally, segment by segment
//!
//! ## Handler Failures
//!
//! Return a [`FailureResponse`] (or any [`ApiFailure`] through `?`) from a
//! handler. On an api path the middleware replaces it with a full envelope
//! whose status comes from the failure, the handler declaration, or the
//! configured mapping table:
//!
//! ```
//! use axum_guard::{FailureResponse, FieldError, ServiceFailure};
//! use http::StatusCode;
//!
//! async fn create_order() -> Result<String, FailureResponse> {
//!     Err(ServiceFailure::new("Validation failed")
//!         .with_status(StatusCode::UNPROCESSABLE_ENTITY)
//!         .with_field_error(FieldError::new("quantity", "must be positive"))
//!         .into())
//! }
//! ```
//!
//! ## Decoding Upstream Errors
//!
//! [`ErrorDecoder`] recovers the envelope from any error response speaking
//! this protocol, whatever form it was sent in.
//!
//! ## Behind a Reverse Proxy
//!
//! Set `forwarded_ip_header` so IP grants see the client rather than the proxy:
//!
//! ```
//! use axum_guard::SecurityConfig;
//!
//! let config = SecurityConfig::from_toml(r#"
//! [auth]
//! forwarded_ip_header = "x-forwarded-for"
//! "#).unwrap();
//! assert_eq!(config.auth.forwarded_ip_header.as_deref(), Some("x-forwarded-for"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod authn;
mod client;
mod codec;
mod config;
mod engine;
mod envelope;
mod error;
mod failure;
mod guard;
mod middleware;
mod principal;
mod rule;
mod rule_set;

// Re-export main types
pub use authn::{
    AuthenticationSelector, ClaimPath, ClaimsMapper, IdentityStore, InMemoryIdentityStore,
    Mechanism, StoredIdentity, StoredPassword, TokenVerifier, DEFAULT_NAME_PATH,
    DEFAULT_ROLE_PATH, DEFAULT_ROLE_SEPARATOR,
};
pub use client::{ClientError, ErrorDecoder};
pub use codec::{AcceptedTypes, EncodedEnvelope, EnvelopeCodec, MediaRange};
pub use config::{
    AuthSettings, BasicUserConfig, ErrorSettings, JwtSettings, MappingConfig, RuleConfig,
    SecurityConfig,
};
pub use engine::{AuthorizationEngine, Decision, DecisionReason};
pub use envelope::{
    format_timestamp, parse_timestamp, ErrorEnvelope, ERROR_CLASS_NAME_HEADER, ERROR_CODE_HEADER,
    ERROR_ID_HEADER, ERROR_MESSAGE_HEADER, ERROR_TIMESTAMP_HEADER, GENERIC_CLASS_NAME,
    NO_ERROR_CODE_VALUE, NO_ID_VALUE, NO_MESSAGE_VALUE, VALIDATION_ERRORS_KEY,
};
pub use error::{
    AccessDenied, CodecError, ConfigError, VerificationError, ACCESS_DENIED_CODE,
    AUTHENTICATION_REQUIRED_CODE,
};
pub use failure::{
    ApiFailure, ErrorEnvelopeBuilder, FailureResponse, FieldError, HandlerInfo, ServiceFailure,
    StatusMapping,
};
pub use guard::{Guard, GuardBuilder, REQUEST_ID_HEADER};
pub use middleware::{GuardLayer, GuardMiddleware};
pub use principal::{ensure_role_prefix, Principal, DEFAULT_ROLE_PREFIX};
pub use rule::{AccessMode, AccessRule, IpMatcher, PathPattern};
pub use rule_set::{RuleSet, RuleSetBuilder};

/// Prelude module for convenient imports.
///
/// ```
/// use axum_guard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::authn::{IdentityStore, TokenVerifier};
    pub use crate::config::SecurityConfig;
    pub use crate::error::{AccessDenied, ConfigError, VerificationError};
    pub use crate::failure::{
        ApiFailure, FailureResponse, FieldError, ServiceFailure, StatusMapping,
    };
    pub use crate::guard::Guard;
    pub use crate::middleware::GuardLayer;
    pub use crate::principal::Principal;
    pub use crate::rule::{AccessMode, AccessRule, IpMatcher, PathPattern};
    pub use crate::rule_set::RuleSet;
}
