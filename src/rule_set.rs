//! Ordered rule set and first-match lookup.
//!
//! The [`RuleSet`] is built once at startup and never mutated afterwards, so
//! it can be shared behind an `Arc` and evaluated concurrently without locks.

use crate::error::ConfigError;
use crate::principal::{ensure_role_prefix, DEFAULT_ROLE_PREFIX};
use crate::rule::{AccessMode, AccessRule};
use http::Method;
use std::sync::Arc;

/// An immutable, ordered collection of access rules.
///
/// # Example
/// ```
/// use axum_guard::{AccessMode, AccessRule, PathPattern, RuleSet};
/// use http::Method;
///
/// let rules = RuleSet::builder()
///     .default_mode(AccessMode::DenyAll)
///     .add_rule(AccessRule::permit_all(PathPattern::parse("/public/**").unwrap()))
///     // Must come before the broader rule for the same prefix
///     .add_rule(
///         AccessRule::restricted(PathPattern::parse("/protected/**").unwrap())
///             .method(Method::POST)
///             .role("ADMIN"),
///     )
///     .add_rule(AccessRule::restricted(PathPattern::parse("/protected/**").unwrap()).role("USER"))
///     .build()
///     .unwrap();
///
/// let rule = rules.match_rule("/protected/x", &Method::POST).unwrap();
/// assert!(rule.roles.contains("ROLE_ADMIN"));
/// ```
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<AccessRule>,
    default_mode: AccessMode,
    resource_server_enabled: bool,
    role_prefix: String,
}

impl RuleSet {
    /// Create a builder for constructing a rule set.
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::new()
    }

    /// A rule set that permits everything and skips authentication.
    pub fn disabled() -> Self {
        Self {
            rules: Vec::new(),
            default_mode: AccessMode::PermitAll,
            resource_server_enabled: false,
            role_prefix: DEFAULT_ROLE_PREFIX.to_string(),
        }
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// The mode applied when no rule matches.
    pub fn default_mode(&self) -> AccessMode {
        self.default_mode
    }

    /// Whether requests are checked at all.
    pub fn resource_server_enabled(&self) -> bool {
        self.resource_server_enabled
    }

    /// Prefix carried by every role in this rule set.
    pub fn role_prefix(&self) -> &str {
        &self.role_prefix
    }

    /// Return the first rule, in configuration order, whose pattern and
    /// method constraint match the request.
    pub fn match_rule(&self, path: &str, method: &Method) -> Option<&AccessRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches_request(path, method))
    }
}

/// Builder for constructing a [`RuleSet`].
#[derive(Debug)]
pub struct RuleSetBuilder {
    rules: Vec<AccessRule>,
    default_mode: AccessMode,
    resource_server_enabled: bool,
    role_prefix: String,
}

impl Default for RuleSetBuilder {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_mode: AccessMode::DenyAll,
            resource_server_enabled: true,
            role_prefix: DEFAULT_ROLE_PREFIX.to_string(),
        }
    }
}

impl RuleSetBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode applied when no rule matches.
    ///
    /// The default is [`AccessMode::DenyAll`].
    pub fn default_mode(mut self, mode: AccessMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Enable or disable request checking. Disabled permits everything.
    pub fn resource_server_enabled(mut self, enabled: bool) -> Self {
        self.resource_server_enabled = enabled;
        self
    }

    /// Set the role prefix (default `ROLE_`).
    pub fn role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.role_prefix = prefix.into();
        self
    }

    /// Append a rule. Rules are evaluated in the order they are added.
    pub fn add_rule(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append several rules, keeping their order.
    pub fn add_rules(mut self, rules: impl IntoIterator<Item = AccessRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Validate the rules and build the rule set.
    pub fn build(self) -> Result<RuleSet, ConfigError> {
        if self.default_mode == AccessMode::Restricted {
            return Err(ConfigError::RestrictedDefault);
        }

        let prefix = self.role_prefix;
        let mut rules = Vec::with_capacity(self.rules.len());

        for (index, mut rule) in self.rules.into_iter().enumerate() {
            if rule.mode == AccessMode::Restricted {
                if rule.roles.is_empty() && rule.ip_allow_list.is_empty() {
                    return Err(ConfigError::InvalidRule {
                        index,
                        pattern: rule.pattern.to_string(),
                        reason: "restricted rule needs at least one role or IP address".to_string(),
                    });
                }
                rule.roles = rule
                    .roles
                    .iter()
                    .map(|r| ensure_role_prefix(&prefix, r))
                    .collect();
            } else {
                rule.roles.clear();
                rule.ip_allow_list.clear();
            }
            rules.push(rule);
        }

        Ok(RuleSet {
            rules,
            default_mode: self.default_mode,
            resource_server_enabled: self.resource_server_enabled,
            role_prefix: prefix,
        })
    }

    /// Build the rule set wrapped in an `Arc` for sharing.
    pub fn build_shared(self) -> Result<Arc<RuleSet>, ConfigError> {
        self.build().map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{IpMatcher, PathPattern};

    fn pattern(s: &str) -> PathPattern {
        PathPattern::parse(s).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RuleSet::builder()
            .add_rule(AccessRule::deny_all(pattern("/api/admin/**")).description("admin"))
            .add_rule(AccessRule::permit_all(pattern("/api/**")).description("api"))
            .build()
            .unwrap();

        let rule = rules.match_rule("/api/admin/users", &Method::GET).unwrap();
        assert_eq!(rule.description.as_deref(), Some("admin"));

        let rule = rules.match_rule("/api/users", &Method::GET).unwrap();
        assert_eq!(rule.description.as_deref(), Some("api"));

        assert!(rules.match_rule("/other", &Method::GET).is_none());
    }

    #[test]
    fn test_overlapping_order_changes_winner() {
        let narrow = AccessRule::deny_all(pattern("/api/admin/**"));
        let broad = AccessRule::permit_all(pattern("/api/**"));

        let narrow_first = RuleSet::builder()
            .add_rules([narrow.clone(), broad.clone()])
            .build()
            .unwrap();
        let broad_first = RuleSet::builder()
            .add_rules([broad, narrow])
            .build()
            .unwrap();

        let path = "/api/admin/x";
        assert_eq!(
            narrow_first.match_rule(path, &Method::GET).unwrap().mode,
            AccessMode::DenyAll
        );
        assert_eq!(
            broad_first.match_rule(path, &Method::GET).unwrap().mode,
            AccessMode::PermitAll
        );
    }

    #[test]
    fn test_non_overlapping_order_irrelevant() {
        let a = AccessRule::permit_all(pattern("/a/**"));
        let b = AccessRule::deny_all(pattern("/b/**"));

        let ab = RuleSet::builder().add_rules([a.clone(), b.clone()]).build().unwrap();
        let ba = RuleSet::builder().add_rules([b, a]).build().unwrap();

        for path in ["/a/x", "/b/x", "/c"] {
            let left = ab.match_rule(path, &Method::GET).map(|r| r.mode);
            let right = ba.match_rule(path, &Method::GET).map(|r| r.mode);
            assert_eq!(left, right, "path {path}");
        }
    }

    #[test]
    fn test_method_constraint_skips_rule() {
        let rules = RuleSet::builder()
            .add_rule(
                AccessRule::restricted(pattern("/protected/**"))
                    .method(Method::POST)
                    .role("ADMIN"),
            )
            .add_rule(AccessRule::restricted(pattern("/protected/**")).role("USER"))
            .build()
            .unwrap();

        let get = rules.match_rule("/protected/x", &Method::GET).unwrap();
        assert!(get.roles.contains("ROLE_USER"));

        let post = rules.match_rule("/protected/x", &Method::POST).unwrap();
        assert!(post.roles.contains("ROLE_ADMIN"));
    }

    #[test]
    fn test_roles_normalized_with_prefix() {
        let rules = RuleSet::builder()
            .role_prefix("SCOPE_")
            .add_rule(AccessRule::restricted(pattern("/x")).roles(["read", "SCOPE_write"]))
            .build()
            .unwrap();

        let roles: Vec<&str> = rules.rules()[0].roles.iter().map(String::as_str).collect();
        assert_eq!(roles, vec!["SCOPE_read", "SCOPE_write"]);
    }

    #[test]
    fn test_restricted_without_grants_rejected() {
        let result = RuleSet::builder()
            .add_rule(AccessRule::permit_all(pattern("/ok")))
            .add_rule(AccessRule::restricted(pattern("/broken")))
            .build();

        match result {
            Err(ConfigError::InvalidRule { index, pattern, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(pattern, "/broken");
            }
            other => panic!("Expected InvalidRule, got {:?}", other),
        }
    }

    #[test]
    fn test_restricted_with_ip_only_accepted() {
        let rules = RuleSet::builder()
            .add_rule(
                AccessRule::restricted(pattern("/internal/**"))
                    .ip(IpMatcher::parse("10.0.0.0/8").unwrap()),
            )
            .build()
            .unwrap();
        assert_eq!(rules.rules().len(), 1);
    }

    #[test]
    fn test_restricted_default_rejected() {
        let result = RuleSet::builder().default_mode(AccessMode::Restricted).build();
        assert!(matches!(result, Err(ConfigError::RestrictedDefault)));
    }

    #[test]
    fn test_grants_ignored_outside_restricted() {
        let rules = RuleSet::builder()
            .add_rule(AccessRule::permit_all(pattern("/x")).role("ADMIN"))
            .build()
            .unwrap();
        assert!(rules.rules()[0].roles.is_empty());
    }
}
