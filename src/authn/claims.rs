//! Projecting verified token claims onto a [`Principal`].

use crate::error::ConfigError;
use crate::principal::{ensure_role_prefix, Principal, DEFAULT_ROLE_PREFIX};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Default claim holding roles.
pub const DEFAULT_ROLE_PATH: &str = "$.scope";

/// Default claim holding the principal name.
pub const DEFAULT_NAME_PATH: &str = "$.sub";

/// Default separator for roles packed into one string claim.
pub const DEFAULT_ROLE_SEPARATOR: &str = " ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

/// A claim-path expression such as `$.realm_access.roles`,
/// `$['cognito:groups']` or `$.groups[0]`.
///
/// # Example
/// ```
/// use axum_guard::ClaimPath;
/// use serde_json::json;
///
/// let path = ClaimPath::parse("$.realm_access['roles'][1]").unwrap();
/// let claims = json!({"realm_access": {"roles": ["user", "admin"]}});
/// assert_eq!(path.resolve(&claims), Some(&json!("admin")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPath {
    raw: String,
    steps: Vec<Step>,
}

impl ClaimPath {
    /// Parse a claim-path expression. It must start with `$`.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let raw = expr.trim();
        let invalid =
            |reason: &str| ConfigError::InvalidClaimPath(raw.to_string(), reason.to_string());

        let Some(mut rest) = raw.strip_prefix('$') else {
            return Err(invalid("must start with '$'"));
        };

        let mut steps = Vec::new();
        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let end = after_dot
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(after_dot.len());
                let name = &after_dot[..end];
                if name.is_empty() {
                    return Err(invalid("empty name after '.'"));
                }
                steps.push(Step::Key(name.to_string()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let close = after_bracket
                    .find(']')
                    .ok_or_else(|| invalid("unclosed '['"))?;
                let inner = after_bracket[..close].trim();
                let step = match (inner.chars().next(), inner.chars().last()) {
                    (Some(q @ ('\'' | '"')), Some(last)) if inner.len() >= 2 && last == q => {
                        Step::Key(inner[1..inner.len() - 1].to_string())
                    }
                    _ => inner
                        .parse::<usize>()
                        .map(Step::Index)
                        .map_err(|_| invalid("expected a quoted name or an index inside '[]'"))?,
                };
                steps.push(step);
                rest = &after_bracket[close + 1..];
            } else {
                return Err(invalid("expected '.' or '['"));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            steps,
        })
    }

    /// The expression as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Look the path up in a claim set.
    pub fn resolve<'v>(&self, claims: &'v Value) -> Option<&'v Value> {
        self.steps.iter().try_fold(claims, |value, step| match step {
            Step::Key(key) => value.get(key.as_str()),
            Step::Index(index) => value.get(*index),
        })
    }
}

impl FromStr for ClaimPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ClaimPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Maps a verified claim set to a [`Principal`].
#[derive(Debug, Clone)]
pub struct ClaimsMapper {
    role_paths: Vec<ClaimPath>,
    name_path: ClaimPath,
    separator: String,
    role_prefix: String,
}

impl Default for ClaimsMapper {
    fn default() -> Self {
        Self {
            role_paths: vec![ClaimPath {
                raw: DEFAULT_ROLE_PATH.to_string(),
                steps: vec![Step::Key("scope".to_string())],
            }],
            name_path: ClaimPath {
                raw: DEFAULT_NAME_PATH.to_string(),
                steps: vec![Step::Key("sub".to_string())],
            },
            separator: DEFAULT_ROLE_SEPARATOR.to_string(),
            role_prefix: DEFAULT_ROLE_PREFIX.to_string(),
        }
    }
}

impl ClaimsMapper {
    /// Roles from `$.scope`, name from `$.sub`, space separated, `ROLE_` prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the role claim paths.
    pub fn with_role_paths(mut self, paths: Vec<ClaimPath>) -> Self {
        self.role_paths = paths;
        self
    }

    /// Replace the name claim path.
    pub fn with_name_path(mut self, path: ClaimPath) -> Self {
        self.name_path = path;
        self
    }

    /// Set the separator for string role claims.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Set the role prefix.
    pub fn with_role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.role_prefix = prefix.into();
        self
    }

    /// Collect normalized roles from every role path.
    pub fn roles(&self, claims: &Value) -> BTreeSet<String> {
        let mut roles = BTreeSet::new();
        for path in &self.role_paths {
            match path.resolve(claims) {
                Some(Value::String(packed)) if self.separator.is_empty() => {
                    roles.extend(self.normalize(std::iter::once(packed.as_str())));
                }
                Some(Value::String(packed)) => {
                    roles.extend(self.normalize(packed.split(self.separator.as_str())));
                }
                Some(Value::Array(items)) => {
                    roles.extend(self.normalize(items.iter().filter_map(Value::as_str)));
                }
                Some(other) => {
                    tracing::debug!(path = %path, value = %other, "Ignoring non-string role claim");
                }
                None => {}
            }
        }
        roles
    }

    /// The principal name, if the name claim is a string or number.
    pub fn name(&self, claims: &Value) -> Option<String> {
        match self.name_path.resolve(claims)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Build the authenticated principal for a verified claim set.
    pub fn principal(&self, claims: &Value, address: Option<IpAddr>) -> Principal {
        let name = self.name(claims).unwrap_or_default();
        Principal::authenticated(name, self.roles(claims)).with_address(address)
    }

    fn normalize<'a>(
        &'a self,
        roles: impl Iterator<Item = &'a str> + 'a,
    ) -> impl Iterator<Item = String> + 'a {
        roles
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| ensure_role_prefix(&self.role_prefix, r))
    }
}
