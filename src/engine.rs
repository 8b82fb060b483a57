//! The authorization decision engine.
//!
//! [`AuthorizationEngine::decide`] is a pure function of the rule set, the
//! request path and method, and the [`Principal`]. It keeps no state between
//! calls and performs no I/O.

use crate::principal::Principal;
use crate::rule::{AccessMode, AccessRule};
use crate::rule_set::RuleSet;
use http::{Method, StatusCode};
use std::sync::Arc;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// No rule matched; the default mode decided.
    NoMatchDefault,
    /// A permit-all rule matched, or checking is disabled.
    ExplicitPermit,
    /// A deny-all rule matched, or a restricted rule granted nothing.
    ExplicitDeny,
    /// A restricted rule granted access through one of the caller's roles.
    RoleGrant,
    /// A restricted rule granted access through the caller's address.
    IpGrant,
    /// Access requires an authenticated caller.
    Unauthenticated,
}

/// The result of one authorization evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<'a> {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The rule that decided, if any matched.
    pub matched_rule: Option<&'a AccessRule>,
    /// Why.
    pub reason: DecisionReason,
}

impl<'a> Decision<'a> {
    fn allow(matched_rule: Option<&'a AccessRule>, reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            matched_rule,
            reason,
        }
    }

    fn deny(matched_rule: Option<&'a AccessRule>, reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            matched_rule,
            reason,
        }
    }

    /// The status a denial should be reported with: 401 when the caller has
    /// to authenticate, 403 otherwise. `None` when allowed.
    pub fn status(&self) -> Option<StatusCode> {
        match (self.allowed, self.reason) {
            (true, _) => None,
            (false, DecisionReason::Unauthenticated) => Some(StatusCode::UNAUTHORIZED),
            (false, _) => Some(StatusCode::FORBIDDEN),
        }
    }
}

/// Evaluates requests against a shared [`RuleSet`].
///
/// # Example
/// ```
/// use axum_guard::{AccessMode, AccessRule, AuthorizationEngine, PathPattern, Principal, RuleSet};
/// use http::Method;
///
/// let rules = RuleSet::builder()
///     .add_rule(AccessRule::restricted(PathPattern::parse("/protected/**").unwrap()).role("USER"))
///     .build_shared()
///     .unwrap();
/// let engine = AuthorizationEngine::new(rules);
///
/// let user = Principal::authenticated("alice", ["ROLE_USER"]);
/// assert!(engine.decide("/protected/x", &Method::GET, &user).allowed);
/// assert!(!engine.decide("/protected/x", &Method::GET, &Principal::anonymous()).allowed);
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizationEngine {
    rule_set: Arc<RuleSet>,
}

impl AuthorizationEngine {
    /// Create an engine over a rule set.
    pub fn new(rule_set: Arc<RuleSet>) -> Self {
        Self { rule_set }
    }

    /// The rule set this engine evaluates.
    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    /// Decide whether `principal` may perform `method` on `path`.
    pub fn decide(&self, path: &str, method: &Method, principal: &Principal) -> Decision<'_> {
        let rule_set = &*self.rule_set;

        if !rule_set.resource_server_enabled() {
            return Decision::allow(None, DecisionReason::ExplicitPermit);
        }

        let decision = match rule_set.match_rule(path, method) {
            Some(rule) => Self::apply_rule(rule, principal),
            None => Self::apply_default(rule_set.default_mode(), principal),
        };

        tracing::debug!(
            path = path,
            method = %method,
            principal = principal.name().unwrap_or("-"),
            authenticated = principal.is_authenticated(),
            rule = ?decision.matched_rule.map(|r| r.pattern.as_str()),
            allowed = decision.allowed,
            reason = ?decision.reason,
            "Authorization decision"
        );

        decision
    }

    fn apply_rule<'a>(rule: &'a AccessRule, principal: &Principal) -> Decision<'a> {
        match rule.mode {
            AccessMode::PermitAll => Decision::allow(Some(rule), DecisionReason::ExplicitPermit),
            AccessMode::DenyAll => Decision::deny(Some(rule), DecisionReason::ExplicitDeny),
            AccessMode::Restricted => {
                if !principal.is_authenticated() {
                    return Decision::deny(Some(rule), DecisionReason::Unauthenticated);
                }
                if rule.grants_any_role(principal.roles()) {
                    return Decision::allow(Some(rule), DecisionReason::RoleGrant);
                }
                if principal.address().is_some_and(|ip| rule.allows_ip(&ip)) {
                    return Decision::allow(Some(rule), DecisionReason::IpGrant);
                }
                Decision::deny(Some(rule), DecisionReason::ExplicitDeny)
            }
        }
    }

    fn apply_default(mode: AccessMode, principal: &Principal) -> Decision<'static> {
        match mode {
            AccessMode::PermitAll => Decision::allow(None, DecisionReason::NoMatchDefault),
            AccessMode::DenyAll => Decision::deny(None, DecisionReason::NoMatchDefault),
            // An empty restricted default grants nothing.
            AccessMode::Restricted if !principal.is_authenticated() => {
                Decision::deny(None, DecisionReason::Unauthenticated)
            }
            AccessMode::Restricted => Decision::deny(None, DecisionReason::NoMatchDefault),
        }
    }
}
