//! Per-request caller identity.

use axum::extract::FromRequestParts;
use http::request::Parts;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::net::IpAddr;

/// Default prefix carried by every role string.
pub const DEFAULT_ROLE_PREFIX: &str = "ROLE_";

/// Identity of the caller for one request.
///
/// Roles are expected to be normalized with the configured role prefix
/// (see [`ensure_role_prefix`]). The guard inserts the principal into request
/// extensions, so handlers can take it as an extractor:
///
/// ```
/// use axum_guard::Principal;
///
/// async fn whoami(principal: Principal) -> String {
///     principal.name().unwrap_or("anonymous").to_string()
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    name: Option<String>,
    roles: BTreeSet<String>,
    address: Option<IpAddr>,
    authenticated: bool,
}

impl Principal {
    /// An unauthenticated caller with no roles.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated caller with the given (already normalized) roles.
    pub fn authenticated<I, R>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            name: Some(name.into()),
            roles: roles.into_iter().map(Into::into).collect(),
            address: None,
            authenticated: true,
        }
    }

    /// Attach the caller's source address.
    pub fn with_address(mut self, address: Option<IpAddr>) -> Self {
        self.address = address;
        self
    }

    /// The principal name, if authenticated.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The caller's roles.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Whether the caller holds `role` (exact match).
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// The caller's source address, if known.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Whether credentials were presented and verified.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Prepend `prefix` to `role` unless it already carries it.
///
/// # Example
/// ```
/// use axum_guard::ensure_role_prefix;
///
/// assert_eq!(ensure_role_prefix("ROLE_", "ADMIN"), "ROLE_ADMIN");
/// assert_eq!(ensure_role_prefix("ROLE_", "ROLE_ADMIN"), "ROLE_ADMIN");
/// ```
pub fn ensure_role_prefix(prefix: &str, role: &str) -> String {
    let role = role.trim();
    if role.starts_with(prefix) {
        role.to_string()
    } else {
        format!("{prefix}{role}")
    }
}
