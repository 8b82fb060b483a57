//! TOML configuration.
//!
//! The whole guard is configured from one TOML document, either compiled in
//! with `include_str!` or read from a file at startup. Everything is
//! validated when loaded; a configuration that loads can be turned into a
//! [`Guard`](crate::Guard) without further errors.
//!
//! # Example TOML Format
//!
//! ```toml
//! [auth]
//! resource_server = true
//! default_mode = "deny_all"
//! role_prefix = "ROLE_"
//! realm = "orders"
//! forwarded_ip_header = "X-Forwarded-For"
//!
//! [[auth.rules]]
//! pattern = "/public/**"
//! mode = "permit_all"
//!
//! [[auth.rules]]
//! pattern = "/protected/**"
//! method = "POST"
//! roles = ["ADMIN"]
//!
//! [[auth.rules]]
//! pattern = "/protected/**"
//! roles = ["USER"]
//! ip_allow_list = ["10.0.0.0/8"]
//! description = "Users, or anyone on the internal network"
//!
//! [auth.jwt]
//! role_paths = ["$.scope", "$.realm_access.roles"]
//! name_path = "$.preferred_username"
//!
//! [[auth.basic_users]]
//! name = "admin"
//! password = "{noop}admin"
//! roles = ["ADMIN"]
//!
//! [errors]
//! api_paths = ["/api/**", "/protected/**"]
//!
//! [[errors.mappings]]
//! class_name = "OrderMissing"
//! status = 404
//! error_code = "ORDER_NOT_FOUND"
//! ```

use crate::authn::{DEFAULT_NAME_PATH, DEFAULT_ROLE_PATH, DEFAULT_ROLE_SEPARATOR};
use crate::error::ConfigError;
use crate::failure::StatusMapping;
use crate::principal::DEFAULT_ROLE_PREFIX;
use crate::rule::{AccessMode, AccessRule, IpMatcher, PathPattern};
use crate::rule_set::RuleSet;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Authentication and authorization.
    #[serde(default)]
    pub auth: AuthSettings,
    /// Error rendering.
    #[serde(default)]
    pub errors: ErrorSettings,
}

/// The `[auth]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSettings {
    /// When false, every request is permitted and no credential is read.
    #[serde(default = "default_true")]
    pub resource_server: bool,
    /// Mode for requests no rule matches.
    #[serde(default)]
    pub default_mode: AccessMode,
    /// Prefix every role carries.
    #[serde(default = "default_role_prefix")]
    pub role_prefix: String,
    /// Realm named in basic challenges.
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Header holding the client address when behind a proxy.
    #[serde(default)]
    pub forwarded_ip_header: Option<String>,
    /// Access rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Claim mapping for bearer tokens.
    #[serde(default)]
    pub jwt: Option<JwtSettings>,
    /// Users for basic authentication.
    #[serde(default)]
    pub basic_users: Vec<BasicUserConfig>,
}

fn default_true() -> bool {
    true
}

fn default_role_prefix() -> String {
    DEFAULT_ROLE_PREFIX.to_string()
}

fn default_realm() -> String {
    "Realm".to_string()
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            resource_server: true,
            default_mode: AccessMode::DenyAll,
            role_prefix: default_role_prefix(),
            realm: default_realm(),
            forwarded_ip_header: None,
            rules: Vec::new(),
            jwt: None,
            basic_users: Vec::new(),
        }
    }
}

/// A single `[[auth.rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Path glob.
    pub pattern: String,
    /// HTTP method. Omitted means every method.
    #[serde(default)]
    pub method: Option<String>,
    /// Access mode.
    #[serde(default = "default_rule_mode")]
    pub mode: AccessMode,
    /// Granting roles, with or without the prefix.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Granting addresses or CIDR networks.
    #[serde(default)]
    pub ip_allow_list: Vec<String>,
    /// Optional description for logging.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_rule_mode() -> AccessMode {
    AccessMode::Restricted
}

/// The `[auth.jwt]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtSettings {
    /// Claim paths holding roles.
    #[serde(default = "default_role_paths")]
    pub role_paths: Vec<String>,
    /// Claim path holding the principal name.
    #[serde(default = "default_name_path")]
    pub name_path: String,
    /// Separator for roles packed into one string claim.
    #[serde(default = "default_role_separator")]
    pub role_separator: String,
}

fn default_role_paths() -> Vec<String> {
    vec![DEFAULT_ROLE_PATH.to_string()]
}

fn default_name_path() -> String {
    DEFAULT_NAME_PATH.to_string()
}

fn default_role_separator() -> String {
    DEFAULT_ROLE_SEPARATOR.to_string()
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            role_paths: default_role_paths(),
            name_path: default_name_path(),
            role_separator: default_role_separator(),
        }
    }
}

/// A single `[[auth.basic_users]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicUserConfig {
    /// Login name.
    pub name: String,
    /// Encoded password (`{noop}...`, `{argon2}...` or plain).
    pub password: String,
    /// Roles, with or without the prefix.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The `[errors]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorSettings {
    /// Paths whose handler failures are rendered as envelopes.
    #[serde(default = "default_api_paths")]
    pub api_paths: Vec<String>,
    /// Failure type to status mappings.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

fn default_api_paths() -> Vec<String> {
    vec!["/**".to_string()]
}

impl Default for ErrorSettings {
    fn default() -> Self {
        Self {
            api_paths: default_api_paths(),
            mappings: Vec::new(),
        }
    }
}

/// A single `[[errors.mappings]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Failure type name, full or final segment.
    pub class_name: String,
    /// Status code (400-599).
    pub status: u16,
    /// Default error code.
    #[serde(default)]
    pub error_code: Option<String>,
}

const KNOWN_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

fn parse_method(method: &str) -> Result<Method, ConfigError> {
    let upper = method.trim().to_ascii_uppercase();
    if !KNOWN_METHODS.contains(&upper.as_str()) {
        return Err(ConfigError::InvalidMethod(method.to_string()));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| ConfigError::InvalidMethod(method.to_string()))
}

fn parse_status(status: u16) -> Result<StatusCode, ConfigError> {
    if !(400..=599).contains(&status) {
        return Err(ConfigError::InvalidStatus(status));
    }
    StatusCode::from_u16(status).map_err(|_| ConfigError::InvalidStatus(status))
}

impl RuleConfig {
    /// Convert to an [`AccessRule`]. Roles are not prefixed yet.
    pub fn to_rule(&self) -> Result<AccessRule, ConfigError> {
        let mut rule = AccessRule::new(PathPattern::parse(&self.pattern)?, self.mode)
            .roles(self.roles.iter().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()));

        if let Some(method) = &self.method {
            rule = rule.method(parse_method(method)?);
        }
        for ip in &self.ip_allow_list {
            rule = rule.ip(IpMatcher::parse(ip)?);
        }
        if let Some(desc) = &self.description {
            rule = rule.description(desc.clone());
        }
        Ok(rule)
    }
}

impl SecurityConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Example
    /// ```
    /// use axum_guard::SecurityConfig;
    ///
    /// let toml = r#"
    /// [[auth.rules]]
    /// pattern = "/public/**"
    /// mode = "permit_all"
    /// "#;
    ///
    /// let config = SecurityConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.auth.rules.len(), 1);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: SecurityConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Example
    /// ```ignore
    /// use axum_guard::SecurityConfig;
    ///
    /// let config = SecurityConfig::from_file("config/security.toml").unwrap();
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rule_set()?;
        self.status_mappings()?;
        self.api_paths()?;

        if let Some(header) = &self.auth.forwarded_ip_header {
            http::HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                ConfigError::Invalid(format!("forwarded_ip_header '{}': {}", header, e))
            })?;
        }
        Ok(())
    }

    /// Build the rule set.
    ///
    /// # Example
    /// ```
    /// use axum_guard::SecurityConfig;
    /// use http::Method;
    ///
    /// let config = SecurityConfig::from_toml(r#"
    /// [[auth.rules]]
    /// pattern = "/protected/**"
    /// roles = ["USER"]
    /// "#).unwrap();
    ///
    /// let rules = config.rule_set().unwrap();
    /// let rule = rules.match_rule("/protected/x", &Method::GET).unwrap();
    /// assert!(rule.roles.contains("ROLE_USER"));
    /// ```
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        let rules = self
            .auth
            .rules
            .iter()
            .map(RuleConfig::to_rule)
            .collect::<Result<Vec<_>, _>>()?;

        RuleSet::builder()
            .default_mode(self.auth.default_mode)
            .resource_server_enabled(self.auth.resource_server)
            .role_prefix(self.auth.role_prefix.clone())
            .add_rules(rules)
            .build()
    }

    /// Convert the configured status mappings.
    pub fn status_mappings(&self) -> Result<Vec<StatusMapping>, ConfigError> {
        self.errors
            .mappings
            .iter()
            .map(|m| {
                if m.class_name.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "status mapping without class_name".to_string(),
                    ));
                }
                let mut mapping = StatusMapping::new(m.class_name.trim(), parse_status(m.status)?);
                if let Some(code) = &m.error_code {
                    mapping = mapping.error_code(code.clone());
                }
                Ok(mapping)
            })
            .collect()
    }

    /// Parse the configured api paths.
    pub fn api_paths(&self) -> Result<Vec<PathPattern>, ConfigError> {
        self.errors
            .api_paths
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect()
    }
}

impl RuleSet {
    /// Create a rule set from a TOML configuration string.
    ///
    /// # Example
    /// ```
    /// use axum_guard::RuleSet;
    ///
    /// const CONFIG: &str = r#"
    /// [auth]
    /// default_mode = "permit_all"
    ///
    /// [[auth.rules]]
    /// pattern = "/admin/**"
    /// roles = ["ADMIN"]
    /// "#;
    ///
    /// let rules = RuleSet::from_toml(CONFIG).unwrap();
    /// assert_eq!(rules.rules().len(), 1);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        SecurityConfig::from_toml(toml_str)?.rule_set()
    }

    /// Create a rule set from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        SecurityConfig::from_file(path)?.rule_set()
    }
}
