//! The composition point: configuration and collaborators in, a tower layer out.

use crate::authn::{AuthenticationSelector, IdentityStore, TokenVerifier};
use crate::codec::{AcceptedTypes, EnvelopeCodec};
use crate::config::SecurityConfig;
use crate::engine::{AuthorizationEngine, Decision};
use crate::error::ConfigError;
use crate::failure::{ApiFailure, ErrorEnvelopeBuilder, HandlerInfo, StatusMapping};
use crate::middleware::GuardLayer;
use crate::principal::Principal;
use axum::response::Response;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, HeaderName, Method, StatusCode};
use std::net::IpAddr;
use std::sync::Arc;

/// Request header whose value becomes the envelope id when the failure
/// carries no correlation id of its own.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the middleware needs, assembled once at startup.
///
/// # Example
/// ```
/// use axum_guard::{Guard, SecurityConfig, VerificationError};
/// use serde_json::json;
///
/// let config = SecurityConfig::from_toml(r#"
/// [auth]
/// default_mode = "permit_all"
///
/// [[auth.rules]]
/// pattern = "/admin/**"
/// roles = ["ADMIN"]
/// "#).unwrap();
///
/// let guard = Guard::builder(config)
///     .token_verifier(|_: &str| {
///         Ok::<_, VerificationError>(json!({"sub": "ops", "scope": "ADMIN"}))
///     })
///     .build()
///     .unwrap();
/// assert_eq!(guard.selector().mechanism().name(), "bearer");
/// ```
#[derive(Debug, Clone)]
pub struct Guard {
    engine: AuthorizationEngine,
    selector: AuthenticationSelector,
    builder: ErrorEnvelopeBuilder,
    codec: EnvelopeCodec,
    forwarded_ip_header: Option<HeaderName>,
}

/// Assembles a [`Guard`] from configuration and collaborators.
pub struct GuardBuilder {
    config: SecurityConfig,
    token_verifier: Option<Arc<dyn TokenVerifier>>,
    identity_store: Option<Arc<dyn IdentityStore>>,
    mappings: Vec<StatusMapping>,
}

impl GuardBuilder {
    /// Register the bearer token verifier. Selects bearer authentication.
    pub fn token_verifier(mut self, verifier: impl TokenVerifier + 'static) -> Self {
        self.token_verifier = Some(Arc::new(verifier));
        self
    }

    /// Register the store used for basic authentication instead of the
    /// configured users.
    pub fn identity_store(mut self, store: impl IdentityStore + 'static) -> Self {
        self.identity_store = Some(Arc::new(store));
        self
    }

    /// Add a status mapping. Configured mappings are consulted first.
    pub fn status_mapping(mut self, mapping: StatusMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Validate everything and build the guard.
    pub fn build(self) -> Result<Guard, ConfigError> {
        let config = self.config;
        config.validate()?;

        let rule_set = Arc::new(config.rule_set()?);
        let selector =
            AuthenticationSelector::select(&config.auth, self.token_verifier, self.identity_store)?;
        let builder = ErrorEnvelopeBuilder::new()
            .with_mappings(config.status_mappings()?)
            .with_mappings(self.mappings)
            .with_api_paths(config.api_paths()?);

        let forwarded_ip_header = config
            .auth
            .forwarded_ip_header
            .as_deref()
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes()).map_err(|e| {
                    ConfigError::Invalid(format!("forwarded_ip_header '{}': {}", h, e))
                })
            })
            .transpose()?;

        tracing::info!(
            rules = rule_set.rules().len(),
            default_mode = %rule_set.default_mode(),
            enabled = rule_set.resource_server_enabled(),
            mappings = builder.mappings().len(),
            "Guard built"
        );
        if rule_set.resource_server_enabled() {
            for (index, rule) in rule_set.rules().iter().enumerate() {
                tracing::info!(index, rule = %rule, "Securing requests");
            }
        }

        Ok(Guard {
            engine: AuthorizationEngine::new(rule_set),
            selector,
            builder,
            codec: EnvelopeCodec::new(),
            forwarded_ip_header,
        })
    }
}

impl Guard {
    /// Start building a guard from configuration.
    pub fn builder(config: SecurityConfig) -> GuardBuilder {
        GuardBuilder {
            config,
            token_verifier: None,
            identity_store: None,
            mappings: Vec::new(),
        }
    }

    /// Build a guard with no collaborators: basic authentication against the
    /// configured users.
    pub fn from_config(config: SecurityConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// The authorization engine.
    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    /// The authentication selector.
    pub fn selector(&self) -> &AuthenticationSelector {
        &self.selector
    }

    /// The envelope builder.
    pub fn envelope_builder(&self) -> &ErrorEnvelopeBuilder {
        &self.builder
    }

    /// The envelope codec.
    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// The header holding the client address, if configured.
    pub fn forwarded_ip_header(&self) -> Option<&HeaderName> {
        self.forwarded_ip_header.as_ref()
    }

    /// Establish the caller's identity.
    pub fn authenticate(&self, headers: &HeaderMap, address: Option<IpAddr>) -> Principal {
        self.selector.authenticate(headers, address)
    }

    /// Decide whether `principal` may call `method path`.
    pub fn authorize(&self, path: &str, method: &Method, principal: &Principal) -> Decision<'_> {
        self.engine.decide(path, method, principal)
    }

    /// Whether handler failures on `path` are rendered as envelopes.
    pub fn is_responsible(&self, path: &str) -> bool {
        self.builder.is_responsible(path)
    }

    /// Render a failure as an envelope response negotiated against the
    /// request's `Accept` header.
    pub fn failure_response(
        &self,
        failure: &dyn ApiFailure,
        request_path: Option<&str>,
        handler: Option<&HandlerInfo>,
        request_headers: &HeaderMap,
    ) -> Response {
        let status = self.builder.detect_status(failure, handler);
        let mut envelope = self.builder.build(failure, request_path, handler);

        if !envelope.has_id() {
            if let Some(request_id) = request_headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                envelope.id = request_id.to_string();
            }
        }

        let accepted = AcceptedTypes::from_headers(request_headers);
        let mut response = self.codec.encode(&envelope, &accepted).into_response(status);

        if status == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = self.selector.challenge() {
                response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
            }
        }
        response
    }

    /// Wrap this guard in a tower layer.
    pub fn layer(self) -> GuardLayer {
        GuardLayer::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AccessDenied, ConfigError};
    use crate::failure::ServiceFailure;
    use crate::DecisionReason;
    use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
    use http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const CONFIG: &str = r#"
[auth]
default_mode = "deny_all"
realm = "shop"

[[auth.rules]]
pattern = "/public/**"
mode = "permit_all"

[[auth.rules]]
pattern = "/protected/**"
roles = ["USER"]

[[auth.basic_users]]
name = "alice"
password = "{noop}secret"
roles = ["USER"]

[[errors.mappings]]
class_name = "OrderMissing"
status = 404
error_code = "ORDER_NOT_FOUND"
"#;

    fn guard() -> Guard {
        Guard::from_config(SecurityConfig::from_toml(CONFIG).unwrap()).unwrap()
    }

    fn basic(user: &str, password: &str) -> HeaderMap {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let mut headers = HeaderMap::new();
        let token = STANDARD.encode(format!("{}:{}", user, password));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Basic {}", token)).unwrap());
        headers
    }

    #[test]
    fn test_authenticate_and_authorize() {
        let guard = guard();
        assert_eq!(guard.selector().mechanism().name(), "basic");

        let alice = guard.authenticate(&basic("alice", "secret"), None);
        assert!(alice.is_authenticated());
        assert!(guard.authorize("/protected/x", &Method::GET, &alice).allowed);

        let stranger = guard.authenticate(&basic("alice", "wrong"), None);
        assert!(!stranger.is_authenticated());
        let decision = guard.authorize("/protected/x", &Method::GET, &stranger);
        assert_eq!(decision.reason, DecisionReason::Unauthenticated);
    }

    #[test]
    fn test_unauthenticated_response_has_challenge() {
        let guard = guard();
        let principal = Principal::anonymous();
        let decision = guard.authorize("/protected/x", &Method::GET, &principal);
        let denied = AccessDenied::from_decision(&decision, "/protected/x", Method::GET, None);

        let response =
            guard.failure_response(&denied, Some("/protected/x"), None, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Basic realm=\"shop\"");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_mapping_and_request_id() {
        let guard = guard();
        let failure =
            ServiceFailure::new("Order 42 not found").with_class_name("shop::OrderMissing");
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-77"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));

        let response = guard.failure_response(&failure, Some("/orders/42"), None, &headers);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-error-id"], "req-77");
        assert_eq!(response.headers()["x-error-code"], "ORDER_NOT_FOUND");
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_builder_mappings_follow_config() {
        let guard = Guard::builder(SecurityConfig::from_toml(CONFIG).unwrap())
            .status_mapping(StatusMapping::new("OrderMissing", StatusCode::GONE))
            .status_mapping(StatusMapping::new("Throttled", StatusCode::TOO_MANY_REQUESTS))
            .build()
            .unwrap();

        let missing = ServiceFailure::new("x").with_class_name("OrderMissing");
        let throttled = ServiceFailure::new("x").with_class_name("Throttled");
        assert_eq!(guard.envelope_builder().detect_status(&missing, None), StatusCode::NOT_FOUND);
        assert_eq!(
            guard.envelope_builder().detect_status(&throttled, None),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    struct InfoCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for InfoCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::INFO {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_build_logs_each_rule_once() {
        let config = SecurityConfig::from_toml(CONFIG).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(InfoCounter(count.clone()));

        tracing::subscriber::with_default(subscriber, || Guard::from_config(config).unwrap());
        // mechanism, "Guard built", then one line per rule
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let mut config = SecurityConfig::default();
        config.auth.forwarded_ip_header = Some("bad header".to_string());
        assert!(matches!(Guard::from_config(config), Err(ConfigError::Invalid(_))));
    }
}
