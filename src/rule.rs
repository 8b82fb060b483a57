//! Access rule definitions and matching logic.
//!
//! An [`AccessRule`] binds a path glob (and optionally an HTTP method) to an
//! [`AccessMode`]:
//!
//! - **PermitAll**: anyone, authenticated or not
//! - **DenyAll**: no one
//! - **Restricted**: authenticated callers holding one of the rule's roles,
//!   or connecting from one of the rule's allowed addresses
//!
//! Rules are evaluated by [`RuleSet`](crate::RuleSet) in configuration order.

use crate::error::ConfigError;
use http::Method;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Access mode attached to a rule, or used as the rule set default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Deny every request.
    #[default]
    DenyAll,
    /// Allow every request, including anonymous ones.
    PermitAll,
    /// Allow authenticated requests with a matching role or source address.
    Restricted,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DenyAll => f.write_str("deny_all"),
            Self::PermitAll => f.write_str("permit_all"),
            Self::Restricted => f.write_str("restricted"),
        }
    }
}

/// A single access rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    /// Path pattern to match.
    pub pattern: PathPattern,
    /// HTTP method constraint. `None` matches every method.
    pub method: Option<Method>,
    /// What to do when the rule matches.
    pub mode: AccessMode,
    /// Granting roles (restricted rules only).
    pub roles: BTreeSet<String>,
    /// Granting source addresses (restricted rules only).
    pub ip_allow_list: Vec<IpMatcher>,
    /// Optional description for logging/debugging.
    pub description: Option<String>,
}

impl AccessRule {
    /// Create a rule for `pattern` with the given mode and no constraints.
    pub fn new(pattern: PathPattern, mode: AccessMode) -> Self {
        Self {
            pattern,
            method: None,
            mode,
            roles: BTreeSet::new(),
            ip_allow_list: Vec::new(),
            description: None,
        }
    }

    /// Create a permit-all rule.
    pub fn permit_all(pattern: PathPattern) -> Self {
        Self::new(pattern, AccessMode::PermitAll)
    }

    /// Create a deny-all rule.
    pub fn deny_all(pattern: PathPattern) -> Self {
        Self::new(pattern, AccessMode::DenyAll)
    }

    /// Create a restricted rule. Add roles or addresses before building.
    pub fn restricted(pattern: PathPattern) -> Self {
        Self::new(pattern, AccessMode::Restricted)
    }

    /// Restrict the rule to one HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Add a granting role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add several granting roles.
    pub fn roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Add a granting address or network.
    pub fn ip(mut self, matcher: IpMatcher) -> Self {
        self.ip_allow_list.push(matcher);
        self
    }

    /// Set a description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Check whether this rule applies to the request path and method.
    #[inline]
    pub fn matches_request(&self, path: &str, method: &Method) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.pattern.matches(path)
    }

    /// Check whether the rule's allow list contains `ip`.
    pub fn allows_ip(&self, ip: &IpAddr) -> bool {
        self.ip_allow_list.iter().any(|m| m.matches(ip))
    }

    /// Check whether any of `roles` is a granting role of this rule.
    pub fn grants_any_role<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> bool {
        roles.into_iter().any(|r| self.roles.contains(r))
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)?;
        if let Some(method) = &self.method {
            write!(f, " [{}]", method)?;
        }
        write!(f, " -> {}", self.mode)?;
        if self.mode == AccessMode::Restricted {
            write!(f, " roles={:?} ips={}", self.roles, self.ip_allow_list.len())?;
        }
        Ok(())
    }
}

/// IP address specification for rule matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpMatcher {
    /// Match a single IP address.
    Single(IpAddr),
    /// Match an IP network (CIDR notation).
    Network(IpNetwork),
}

impl IpMatcher {
    /// Create a matcher for a single IP address.
    ///
    /// # Example
    /// ```
    /// use axum_guard::IpMatcher;
    /// use std::net::IpAddr;
    ///
    /// let matcher = IpMatcher::single("192.168.1.1".parse().unwrap());
    /// ```
    pub fn single(ip: IpAddr) -> Self {
        Self::Single(canonical(ip))
    }

    /// Create a matcher for a CIDR network.
    pub fn cidr(network: IpNetwork) -> Self {
        Self::Network(network)
    }

    /// Parse an IP matcher from a string.
    ///
    /// Accepts a single IP address (e.g. `192.168.1.1`) or a CIDR network
    /// (e.g. `192.168.1.0/24`, `fd00::/8`).
    ///
    /// # Example
    /// ```
    /// use axum_guard::IpMatcher;
    ///
    /// let single = IpMatcher::parse("10.0.0.1").unwrap();
    /// let network = IpMatcher::parse("10.0.0.0/8").unwrap();
    /// assert!(IpMatcher::parse("10.0.0.0/99").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        let invalid = |reason: String| ConfigError::InvalidIp(s.to_string(), reason);

        if s.contains('/') {
            return s
                .parse::<IpNetwork>()
                .map(Self::Network)
                .map_err(|e| invalid(e.to_string()));
        }

        s.parse::<IpAddr>()
            .map(Self::single)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Check if an IP address matches this matcher.
    pub fn matches(&self, ip: &IpAddr) -> bool {
        let ip = canonical(*ip);
        match self {
            Self::Single(addr) => *addr == ip,
            Self::Network(network) => network.contains(ip),
        }
    }
}

impl fmt::Display for IpMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(addr) => write!(f, "{}", addr),
            Self::Network(net) => write!(f, "{}", net),
        }
    }
}

// `::ffff:10.0.0.1` is the same caller as `10.0.0.1`.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Path glob used by access rules and api-path selection.
///
/// - `*` matches exactly one path segment
/// - `**` matches zero or more path segments
/// - any other segment matches literally
///
/// Empty segments (doubled or trailing slashes) are ignored on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Any,
}

impl PathPattern {
    /// Parse a path glob. The pattern must start with `/`.
    ///
    /// # Example
    /// ```
    /// use axum_guard::PathPattern;
    ///
    /// let pattern = PathPattern::parse("/api/*/users").unwrap();
    /// assert!(pattern.matches("/api/v1/users"));
    /// assert!(!pattern.matches("/api/v1/posts"));
    ///
    /// let pattern = PathPattern::parse("/public/**").unwrap();
    /// assert!(pattern.matches("/public"));
    /// assert!(pattern.matches("/public/a/b/c"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let raw = pattern.trim();
        if !raw.starts_with('/') {
            return Err(ConfigError::InvalidPattern(
                raw.to_string(),
                "pattern must start with '/'".to_string(),
            ));
        }

        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "**" => Segment::Any,
                "*" => Segment::Single,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// A pattern matching every path (`/**`).
    pub fn any() -> Self {
        Self {
            raw: "/**".to_string(),
            segments: vec![Segment::Any],
        }
    }

    /// The pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check if a request path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self::match_parts(&self.segments, &path_parts)
    }

    fn match_parts(pattern: &[Segment], path: &[&str]) -> bool {
        let Some((first, rest)) = pattern.split_first() else {
            return path.is_empty();
        };

        match first {
            Segment::Any => {
                if rest.is_empty() {
                    return true;
                }
                // Try matching ** against 0, 1, 2, ... path segments
                (0..=path.len()).any(|i| Self::match_parts(rest, &path[i..]))
            }
            _ if path.is_empty() => false,
            Segment::Single => Self::match_parts(rest, &path[1..]),
            Segment::Literal(lit) => lit == path[0] && Self::match_parts(rest, &path[1..]),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> PathPattern {
        PathPattern::parse(s).unwrap()
    }

    #[test]
    fn test_ip_matcher_single() {
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        let matcher = IpMatcher::single(ip);
        assert!(matcher.matches(&ip));
        assert!(!matcher.matches(&"192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_ip_matcher_cidr() {
        let matcher = IpMatcher::parse("192.168.1.0/24").unwrap();
        assert!(matcher.matches(&"192.168.1.1".parse().unwrap()));
        assert!(matcher.matches(&"192.168.1.255".parse().unwrap()));
        assert!(!matcher.matches(&"192.168.2.1".parse().unwrap()));
    }

    #[test]
    fn test_ip_matcher_mapped_v6() {
        let matcher = IpMatcher::parse("10.0.0.0/8").unwrap();
        assert!(matcher.matches(&"::ffff:10.1.2.3".parse().unwrap()));

        let matcher = IpMatcher::parse("::ffff:127.0.0.1").unwrap();
        assert!(matcher.matches(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_ip_matcher_invalid() {
        assert!(matches!(
            IpMatcher::parse("not-an-ip"),
            Err(ConfigError::InvalidIp(..))
        ));
        assert!(IpMatcher::parse("10.0.0.0/40").is_err());
    }

    #[test]
    fn test_pattern_exact() {
        let p = pattern("/api/users");
        assert!(p.matches("/api/users"));
        assert!(p.matches("/api/users/"));
        assert!(!p.matches("/api/users/1"));
        assert!(!p.matches("/api"));
    }

    #[test]
    fn test_pattern_single_segment() {
        let p = pattern("/api/*/users");
        assert!(p.matches("/api/v1/users"));
        assert!(p.matches("/api/v2/users"));
        assert!(!p.matches("/api/v1/posts"));
        assert!(!p.matches("/api/users"));
        assert!(!p.matches("/api/v1/v2/users"));
    }

    #[test]
    fn test_pattern_any_segments() {
        let p = pattern("/api/**");
        assert!(p.matches("/api"));
        assert!(p.matches("/api/users"));
        assert!(p.matches("/api/v1/users/1"));
        assert!(!p.matches("/apix"));

        let p = pattern("/**/health");
        assert!(p.matches("/health"));
        assert!(p.matches("/a/b/health"));
        assert!(!p.matches("/a/b/healthz"));

        assert!(pattern("/**").matches("/"));
    }

    #[test]
    fn test_pattern_must_be_absolute() {
        assert!(matches!(
            PathPattern::parse("api/**"),
            Err(ConfigError::InvalidPattern(..))
        ));
        assert!(PathPattern::parse("").is_err());
    }

    #[test]
    fn test_rule_method_constraint() {
        let rule = AccessRule::restricted(pattern("/protected/**"))
            .method(Method::POST)
            .role("ROLE_ADMIN");
        assert!(rule.matches_request("/protected/x", &Method::POST));
        assert!(!rule.matches_request("/protected/x", &Method::GET));

        let any_method = AccessRule::permit_all(pattern("/protected/**"));
        assert!(any_method.matches_request("/protected/x", &Method::DELETE));
    }

    #[test]
    fn test_rule_grants() {
        let rule = AccessRule::restricted(pattern("/x"))
            .roles(["ROLE_A", "ROLE_B"])
            .ip(IpMatcher::parse("10.0.0.0/8").unwrap());

        let roles = vec!["ROLE_C".to_string(), "ROLE_B".to_string()];
        assert!(rule.grants_any_role(&roles));
        assert!(!rule.grants_any_role(&vec!["ROLE_C".to_string()]));
        assert!(rule.allows_ip(&"10.9.9.9".parse().unwrap()));
        assert!(!rule.allows_ip(&"11.0.0.1".parse().unwrap()));
    }
}
