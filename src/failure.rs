//! Turning failures into envelopes.
//!
//! Anything implementing [`ApiFailure`] can be rendered by the guard. The
//! [`ErrorEnvelopeBuilder`] detects the response status and fills in an
//! [`ErrorEnvelope`], degrading to sentinels instead of failing.

use crate::envelope::{
    self, ErrorEnvelope, GENERIC_CLASS_NAME, NO_ERROR_CODE_VALUE, NO_ID_VALUE, NO_MESSAGE_VALUE,
    VALIDATION_ERRORS_KEY,
};
use crate::rule::PathPattern;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SubsecRound, Utc};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A failure that can be reported through the error envelope.
///
/// Every method has a default, so an empty impl is enough for any error type:
///
/// ```
/// use axum_guard::ApiFailure;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("Order {0} not found")]
/// struct OrderNotFound(u64);
///
/// impl ApiFailure for OrderNotFound {}
///
/// assert!(OrderNotFound(42).class_name().ends_with("OrderNotFound"));
/// ```
pub trait ApiFailure: std::error::Error + Send + Sync + 'static {
    /// Status the failure insists on. Takes precedence over every mapping.
    fn status(&self) -> Option<StatusCode> {
        None
    }

    /// Application defined error code.
    fn error_code(&self) -> Option<&str> {
        None
    }

    /// Correlation id known to the failure.
    fn correlation_id(&self) -> Option<&str> {
        None
    }

    /// When the failure happened, if recorded.
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Field-level validation errors, in the order they were raised.
    fn field_errors(&self) -> &[FieldError] {
        &[]
    }

    /// Extra detail copied into the envelope extensions.
    fn extensions(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Type name reported in the envelope and used for status mappings.
    fn class_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// More general names this failure also answers to, most specific first.
    fn parent_class_names(&self) -> &[&str] {
        &[]
    }
}

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// Field name or path.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
    /// The rejected value, if it can be shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_value: Option<Value>,
}

impl FieldError {
    /// Create a field error without a rejected value.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            rejected_value: None,
        }
    }

    /// Attach the rejected value.
    pub fn rejected_value(mut self, value: Value) -> Self {
        self.rejected_value = Some(value);
        self
    }
}

/// Maps a failure type name to a status, and optionally a default code.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMapping {
    /// Full type name, or just its final `::` segment.
    pub class_name: String,
    /// Status to respond with.
    pub status: StatusCode,
    /// Code used when the failure has none.
    pub error_code: Option<String>,
}

impl StatusMapping {
    /// Create a mapping.
    pub fn new(class_name: impl Into<String>, status: StatusCode) -> Self {
        Self {
            class_name: class_name.into(),
            status,
            error_code: None,
        }
    }

    /// Set the default error code.
    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Check whether this mapping applies to `name`.
    pub fn matches(&self, name: &str) -> bool {
        name == self.class_name || short_name(name) == self.class_name
    }
}

// `a::b::Foo<c::Bar>` -> `Foo`
fn short_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Status and code declared by the handler that produced a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerInfo {
    /// Handler name, for logging.
    pub name: String,
    /// Status declared by the handler.
    pub status: Option<StatusCode>,
    /// Code declared by the handler.
    pub error_code: Option<String>,
}

impl HandlerInfo {
    /// Create handler info with no declarations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare a status.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Declare an error code.
    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }
}

/// Converts failures into envelopes.
///
/// # Example
/// ```
/// use axum_guard::{ErrorEnvelopeBuilder, ServiceFailure, StatusMapping};
/// use http::StatusCode;
///
/// let builder = ErrorEnvelopeBuilder::new()
///     .with_mapping(StatusMapping::new("OrderMissing", StatusCode::NOT_FOUND));
///
/// let failure = ServiceFailure::new("Order 42 not found").with_class_name("shop::OrderMissing");
/// assert_eq!(builder.detect_status(&failure, None), StatusCode::NOT_FOUND);
///
/// let envelope = builder.build(&failure, Some("/orders/42"), None);
/// assert_eq!(envelope.message, "Order 42 not found");
/// assert_eq!(envelope.class_name, "shop::OrderMissing");
/// ```
#[derive(Debug, Clone)]
pub struct ErrorEnvelopeBuilder {
    mappings: Vec<StatusMapping>,
    api_paths: Vec<PathPattern>,
}

impl Default for ErrorEnvelopeBuilder {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            api_paths: vec![PathPattern::any()],
        }
    }
}

impl ErrorEnvelopeBuilder {
    /// Create a builder with no mappings, responsible for every path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a status mapping. Earlier mappings win for the same name.
    pub fn with_mapping(mut self, mapping: StatusMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Append several status mappings.
    pub fn with_mappings(mut self, mappings: impl IntoIterator<Item = StatusMapping>) -> Self {
        self.mappings.extend(mappings);
        self
    }

    /// Replace the api paths.
    pub fn with_api_paths(mut self, api_paths: Vec<PathPattern>) -> Self {
        self.api_paths = api_paths;
        self
    }

    /// The configured mappings.
    pub fn mappings(&self) -> &[StatusMapping] {
        &self.mappings
    }

    /// Whether failures on `path` should be rendered as envelopes.
    pub fn is_responsible(&self, path: &str) -> bool {
        self.api_paths.iter().any(|p| p.matches(path))
    }

    /// Detect the response status for a failure.
    ///
    /// Precedence: the failure's own status, the handler's declared status,
    /// the mapping table (class name, then each parent name), then 500.
    pub fn detect_status(
        &self,
        failure: &dyn ApiFailure,
        handler: Option<&HandlerInfo>,
    ) -> StatusCode {
        if let Some(status) = introspect("status", || failure.status()).flatten() {
            return status;
        }
        if let Some(status) = handler.and_then(|h| h.status) {
            return status;
        }
        self.find_mapping(failure)
            .map(|m| m.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Build the envelope for a failure. Never fails.
    pub fn build(
        &self,
        failure: &dyn ApiFailure,
        request_path: Option<&str>,
        handler: Option<&HandlerInfo>,
    ) -> ErrorEnvelope {
        let id = introspect("correlation_id", || failure.correlation_id().map(str::to_string))
            .flatten()
            .unwrap_or_else(|| NO_ID_VALUE.to_string());

        let timestamp = introspect("timestamp", || failure.timestamp())
            .flatten()
            .map(|ts| ts.trunc_subsecs(3))
            .unwrap_or_else(envelope::now);

        let message = introspect("message", || failure.to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| NO_MESSAGE_VALUE.to_string());

        let error_code = introspect("error_code", || failure.error_code().map(str::to_string))
            .flatten()
            .or_else(|| self.find_mapping(failure).and_then(|m| m.error_code.clone()))
            .or_else(|| handler.and_then(|h| h.error_code.clone()))
            .unwrap_or_else(|| NO_ERROR_CODE_VALUE.to_string());

        let class_name = introspect("class_name", || failure.class_name().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| GENERIC_CLASS_NAME.to_string());

        let mut extensions = introspect("extensions", || failure.extensions()).unwrap_or_default();
        let field_errors = introspect("field_errors", || {
            failure
                .field_errors()
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
        if !field_errors.is_empty() {
            extensions.insert(VALIDATION_ERRORS_KEY.to_string(), Value::Array(field_errors));
        }

        tracing::debug!(
            path = request_path.unwrap_or("-"),
            handler = handler.map(|h| h.name.as_str()).unwrap_or("-"),
            class_name = %class_name,
            error_code = %error_code,
            "Built error envelope"
        );

        ErrorEnvelope {
            id,
            timestamp,
            message,
            error_code,
            class_name,
            extensions,
        }
    }

    fn find_mapping(&self, failure: &dyn ApiFailure) -> Option<&StatusMapping> {
        if self.mappings.is_empty() {
            return None;
        }
        let names = introspect("class_name", || {
            std::iter::once(failure.class_name())
                .chain(failure.parent_class_names().iter().copied())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })?;

        names
            .iter()
            .find_map(|name| self.mappings.iter().find(|m| m.matches(name)))
    }
}

// User implementations may panic; report the field as unknown instead.
fn introspect<T>(field: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(field, "Failure introspection panicked, using sentinel");
            None
        }
    }
}

/// A ready-made failure for handlers.
///
/// # Example
/// ```
/// use axum_guard::{FailureResponse, FieldError, ServiceFailure};
/// use http::StatusCode;
///
/// async fn create_order() -> Result<&'static str, FailureResponse> {
///     Err(ServiceFailure::new("Order rejected")
///         .with_status(StatusCode::UNPROCESSABLE_ENTITY)
///         .with_error_code("ORDER_INVALID")
///         .with_field_error(FieldError::new("quantity", "must be positive"))
///         .into())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServiceFailure {
    message: String,
    status: Option<StatusCode>,
    error_code: Option<String>,
    correlation_id: Option<String>,
    class_name: Option<String>,
    field_errors: Vec<FieldError>,
    extensions: Map<String, Value>,
}

impl ServiceFailure {
    /// Create a failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the error code.
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Report under a different class name.
    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    /// Add a field error.
    pub fn with_field_error(mut self, error: FieldError) -> Self {
        self.field_errors.push(error);
        self
    }

    /// Add an extension entry.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServiceFailure {}

impl ApiFailure for ServiceFailure {
    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn field_errors(&self) -> &[FieldError] {
        &self.field_errors
    }

    fn extensions(&self) -> Map<String, Value> {
        self.extensions.clone()
    }

    fn class_name(&self) -> &str {
        self.class_name
            .as_deref()
            .unwrap_or(std::any::type_name::<Self>())
    }
}

/// An [`ApiFailure`] returned from an axum handler.
///
/// Rendered on its own, it is a plain-text response with the failure's status
/// (or 500). Behind a [`GuardLayer`](crate::GuardLayer) on an api path it is
/// replaced by a full envelope with the detected status.
#[derive(Clone)]
pub struct FailureResponse {
    failure: Arc<dyn ApiFailure>,
    handler: Option<HandlerInfo>,
}

impl FailureResponse {
    /// Wrap a failure.
    pub fn new(failure: impl ApiFailure) -> Self {
        Self {
            failure: Arc::new(failure),
            handler: None,
        }
    }

    /// Declare the status and code of the handler that failed.
    pub fn with_handler(mut self, handler: HandlerInfo) -> Self {
        self.handler = Some(handler);
        self
    }

    /// The wrapped failure.
    pub fn failure(&self) -> &dyn ApiFailure {
        &*self.failure
    }

    /// The handler declarations, if any.
    pub fn handler(&self) -> Option<&HandlerInfo> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for FailureResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureResponse")
            .field("class_name", &self.failure.class_name())
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

impl<F: ApiFailure> From<F> for FailureResponse {
    fn from(failure: F) -> Self {
        Self::new(failure)
    }
}

impl IntoResponse for FailureResponse {
    fn into_response(self) -> Response {
        let status = self
            .failure
            .status()
            .or_else(|| self.handler.as_ref().and_then(|h| h.status))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.failure.to_string()).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("plain failure")]
    struct PlainFailure;

    impl ApiFailure for PlainFailure {}

    #[derive(Debug, thiserror::Error)]
    #[error("payment declined")]
    struct PaymentDeclined;

    impl ApiFailure for PaymentDeclined {
        fn class_name(&self) -> &str {
            "billing::PaymentDeclined"
        }

        fn parent_class_names(&self) -> &[&str] {
            &["billing::BillingError", "std::io::Error"]
        }
    }

    #[derive(Debug)]
    struct Exploding;

    impl fmt::Display for Exploding {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display exploded")
        }
    }

    impl std::error::Error for Exploding {}

    impl ApiFailure for Exploding {
        fn error_code(&self) -> Option<&str> {
            panic!("code exploded")
        }

        fn correlation_id(&self) -> Option<&str> {
            Some("still-here")
        }
    }

    #[test]
    fn test_status_defaults_to_500() {
        let builder = ErrorEnvelopeBuilder::new();
        assert_eq!(builder.detect_status(&PlainFailure, None), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_precedence() {
        let builder = ErrorEnvelopeBuilder::new()
            .with_mapping(StatusMapping::new("ServiceFailure", StatusCode::BAD_REQUEST));
        let handler = HandlerInfo::new("create").status(StatusCode::CONFLICT);

        let explicit = ServiceFailure::new("x").with_status(StatusCode::NOT_FOUND);
        assert_eq!(builder.detect_status(&explicit, Some(&handler)), StatusCode::NOT_FOUND);

        let bare = ServiceFailure::new("x");
        assert_eq!(builder.detect_status(&bare, Some(&handler)), StatusCode::CONFLICT);
        assert_eq!(builder.detect_status(&bare, None), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_mapping_walks_parents() {
        let builder = ErrorEnvelopeBuilder::new()
            .with_mapping(StatusMapping::new("std::io::Error", StatusCode::SERVICE_UNAVAILABLE))
            .with_mapping(
                StatusMapping::new("BillingError", StatusCode::PAYMENT_REQUIRED)
                    .error_code("BILLING"),
            );

        // The nearer parent wins even though its mapping comes later
        assert_eq!(builder.detect_status(&PaymentDeclined, None), StatusCode::PAYMENT_REQUIRED);
        let envelope = builder.build(&PaymentDeclined, None, None);
        assert_eq!(envelope.error_code, "BILLING");
    }

    #[test]
    fn test_mapping_short_name() {
        let mapping = StatusMapping::new("Foo", StatusCode::GONE);
        assert!(mapping.matches("a::b::Foo"));
        assert!(mapping.matches("a::Foo<b::Bar>"));
        assert!(!mapping.matches("a::Foobar"));
        assert!(StatusMapping::new("a::Foo", StatusCode::GONE).matches("a::Foo"));
    }

    #[test]
    fn test_build_populates_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let failure = ServiceFailure::new("Order rejected")
            .with_error_code("ORDER_INVALID")
            .with_correlation_id("req-7")
            .with_extension("orderId", json!(42))
            .with_field_error(
                FieldError::new("quantity", "must be positive").rejected_value(json!(-1)),
            )
            .with_field_error(FieldError::new("sku", "is required"));

        let envelope = ErrorEnvelopeBuilder::new().build(&failure, Some("/orders"), None);
        assert_eq!(envelope.id, "req-7");
        assert_eq!(envelope.message, "Order rejected");
        assert_eq!(envelope.error_code, "ORDER_INVALID");
        assert!(envelope.class_name.ends_with("ServiceFailure"));
        assert!(envelope.timestamp >= ts);

        let keys: Vec<&str> = envelope.extensions.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["orderId", VALIDATION_ERRORS_KEY]);
        assert_eq!(
            envelope.extensions[VALIDATION_ERRORS_KEY],
            json!([
                {"field": "quantity", "message": "must be positive", "rejectedValue": -1},
                {"field": "sku", "message": "is required"}
            ])
        );
    }

    #[test]
    fn test_build_sentinels() {
        let handler = HandlerInfo::new("h").error_code("HANDLER_CODE");
        let envelope =
            ErrorEnvelopeBuilder::new().build(&ServiceFailure::new(""), None, Some(&handler));
        assert_eq!(envelope.id, NO_ID_VALUE);
        assert_eq!(envelope.message, NO_MESSAGE_VALUE);
        assert_eq!(envelope.error_code, "HANDLER_CODE");
        assert!(envelope.extensions.is_empty());

        let envelope = ErrorEnvelopeBuilder::new().build(&PlainFailure, None, None);
        assert_eq!(envelope.error_code, NO_ERROR_CODE_VALUE);
    }

    #[test]
    fn test_build_survives_panics() {
        let envelope = ErrorEnvelopeBuilder::new().build(&Exploding, None, None);
        assert_eq!(envelope.message, NO_MESSAGE_VALUE);
        assert_eq!(envelope.error_code, NO_ERROR_CODE_VALUE);
        assert_eq!(envelope.id, "still-here");
    }

    #[test]
    fn test_api_paths() {
        let builder = ErrorEnvelopeBuilder::new();
        assert!(builder.is_responsible("/anything"));

        let builder = builder.with_api_paths(vec![PathPattern::parse("/api/**").unwrap()]);
        assert!(builder.is_responsible("/api/orders"));
        assert!(!builder.is_responsible("/static/app.js"));
    }

    #[test]
    fn test_failure_response_carries_failure() {
        let response =
            FailureResponse::from(ServiceFailure::new("gone").with_status(StatusCode::GONE))
                .into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        let carried = response.extensions().get::<FailureResponse>().unwrap();
        assert_eq!(carried.failure().to_string(), "gone");

        let declared = FailureResponse::from(ServiceFailure::new("busy"))
            .with_handler(HandlerInfo::new("reserve").status(StatusCode::CONFLICT))
            .into_response();
        assert_eq!(declared.status(), StatusCode::CONFLICT);
    }
}
