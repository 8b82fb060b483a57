//! Establishing the caller's identity.
//!
//! The [`AuthenticationSelector`] picks one mechanism when the guard is built:
//!
//! 1. checking disabled: every caller is anonymous
//! 2. a [`TokenVerifier`] is registered: `Authorization: Bearer <token>`
//! 3. otherwise: `Authorization: Basic <credentials>` against an
//!    [`IdentityStore`], by default one built from configured users
//!
//! Authentication never fails a request. A missing, malformed or rejected
//! credential yields an anonymous [`Principal`] and the authorization engine
//! decides what that means for the requested path.

mod claims;
mod store;

pub use claims::{
    ClaimPath, ClaimsMapper, DEFAULT_NAME_PATH, DEFAULT_ROLE_PATH, DEFAULT_ROLE_SEPARATOR,
};
pub use store::{IdentityStore, InMemoryIdentityStore, StoredIdentity, StoredPassword};

use crate::config::{AuthSettings, JwtSettings};
use crate::error::{ConfigError, VerificationError};
use crate::principal::{ensure_role_prefix, Principal};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Verifies a bearer token and returns its claim set.
///
/// Signature and key handling live entirely in the implementation. Any
/// closure with the right signature is a verifier:
///
/// ```
/// use axum_guard::{TokenVerifier, VerificationError};
/// use serde_json::json;
///
/// let verifier = |token: &str| {
///     if token == "let-me-in" {
///         Ok(json!({"sub": "alice", "scope": "USER"}))
///     } else {
///         Err(VerificationError::InvalidSignature)
///     }
/// };
/// assert!(verifier.verify("let-me-in").is_ok());
/// ```
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return its claims.
    fn verify(&self, token: &str) -> Result<Value, VerificationError>;
}

impl<F> TokenVerifier for F
where
    F: Fn(&str) -> Result<Value, VerificationError> + Send + Sync,
{
    fn verify(&self, token: &str) -> Result<Value, VerificationError> {
        self(token)
    }
}

/// The mechanism chosen at startup.
#[derive(Clone)]
pub enum Mechanism {
    /// Checking is disabled; no credential is read.
    Disabled,
    /// Bearer tokens verified by a collaborator.
    Bearer {
        /// The token verifier.
        verifier: Arc<dyn TokenVerifier>,
        /// Claim to principal mapping.
        mapper: ClaimsMapper,
    },
    /// Basic credentials checked against a store.
    Basic {
        /// The identity store.
        store: Arc<dyn IdentityStore>,
    },
}

impl Mechanism {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Bearer { .. } => "bearer",
            Self::Basic { .. } => "basic",
        }
    }
}

impl fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turns request credentials into a [`Principal`].
#[derive(Debug, Clone)]
pub struct AuthenticationSelector {
    mechanism: Mechanism,
    role_prefix: String,
    realm: String,
}

impl AuthenticationSelector {
    /// Choose the mechanism for this process.
    ///
    /// Claim paths and configured users are validated even when the chosen
    /// mechanism does not use them.
    pub fn select(
        settings: &AuthSettings,
        token_verifier: Option<Arc<dyn TokenVerifier>>,
        identity_store: Option<Arc<dyn IdentityStore>>,
    ) -> Result<Self, ConfigError> {
        let mapper = claims_mapper(settings.jwt.as_ref(), &settings.role_prefix)?;
        let configured_users = InMemoryIdentityStore::from_config(&settings.basic_users)?;

        let mechanism = if !settings.resource_server {
            Mechanism::Disabled
        } else if let Some(verifier) = token_verifier {
            Mechanism::Bearer { verifier, mapper }
        } else {
            let store = identity_store.unwrap_or_else(|| Arc::new(configured_users));
            Mechanism::Basic { store }
        };

        tracing::info!(mechanism = mechanism.name(), "Authentication configured");

        Ok(Self {
            mechanism,
            role_prefix: settings.role_prefix.clone(),
            realm: settings.realm.clone(),
        })
    }

    /// Use an explicit mechanism.
    pub fn new(
        mechanism: Mechanism,
        role_prefix: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            mechanism,
            role_prefix: role_prefix.into(),
            realm: realm.into(),
        }
    }

    /// The chosen mechanism.
    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    /// Authenticate a request. Never fails.
    pub fn authenticate(&self, headers: &HeaderMap, address: Option<IpAddr>) -> Principal {
        let anonymous = Principal::anonymous().with_address(address);

        let credentials = match &self.mechanism {
            Mechanism::Disabled => return anonymous,
            Mechanism::Bearer { .. } => credentials(headers, "Bearer"),
            Mechanism::Basic { .. } => credentials(headers, "Basic"),
        };
        let Some(credentials) = credentials else {
            return anonymous;
        };

        let principal = match &self.mechanism {
            Mechanism::Disabled => None,
            Mechanism::Bearer { verifier, mapper } => match verifier.verify(credentials) {
                Ok(claims) => Some(mapper.principal(&claims, address)),
                Err(e) => {
                    tracing::debug!(error = %e, "Bearer token rejected");
                    None
                }
            },
            Mechanism::Basic { store } => self.basic(store.as_ref(), credentials, address),
        };

        principal.unwrap_or(anonymous)
    }

    fn basic(
        &self,
        store: &dyn IdentityStore,
        credentials: &str,
        address: Option<IpAddr>,
    ) -> Option<Principal> {
        let decoded = match STANDARD.decode(credentials.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed basic credentials");
                return None;
            }
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            tracing::debug!("Basic credentials are not UTF-8");
            return None;
        };
        let Some((username, password)) = decoded.split_once(':') else {
            tracing::debug!("Basic credentials without ':' separator");
            return None;
        };

        let identity = store.lookup(username);
        match identity {
            Some(identity) if identity.password.verify(password) => {
                let roles = identity
                    .roles
                    .iter()
                    .map(|r| ensure_role_prefix(&self.role_prefix, r));
                Some(
                    Principal::authenticated(identity.username.clone(), roles)
                        .with_address(address),
                )
            }
            Some(_) => {
                tracing::debug!(user = username, "Basic credentials rejected: bad password");
                None
            }
            None => {
                tracing::debug!(user = username, "Basic credentials rejected: unknown user");
                None
            }
        }
    }

    /// The `WWW-Authenticate` challenge for 401 responses.
    pub fn challenge(&self) -> Option<HeaderValue> {
        match &self.mechanism {
            Mechanism::Disabled => None,
            Mechanism::Bearer { .. } => Some(HeaderValue::from_static("Bearer")),
            Mechanism::Basic { .. } => {
                let realm = self.realm.replace('"', "'");
                Some(
                    HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
                        .unwrap_or_else(|_| HeaderValue::from_static("Basic")),
                )
            }
        }
    }
}

// The credential part of `Authorization: <scheme> <credentials>`.
fn credentials<'h>(headers: &'h HeaderMap, scheme: &str) -> Option<&'h str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (given, rest) = value.split_once(' ')?;
    if !given.eq_ignore_ascii_case(scheme) {
        tracing::debug!(expected = scheme, "Authorization header uses another scheme");
        return None;
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}

fn claims_mapper(
    settings: Option<&JwtSettings>,
    role_prefix: &str,
) -> Result<ClaimsMapper, ConfigError> {
    let mapper = ClaimsMapper::new().with_role_prefix(role_prefix);
    let Some(jwt) = settings else {
        return Ok(mapper);
    };
    let role_paths = jwt
        .role_paths
        .iter()
        .map(|p| ClaimPath::parse(p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(mapper
        .with_role_paths(role_paths)
        .with_name_path(ClaimPath::parse(&jwt.name_path)?)
        .with_separator(jwt.role_separator.clone()))
}
