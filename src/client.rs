//! Client side: turning an error response back into a typed error.

use crate::codec::EnvelopeCodec;
use crate::envelope::{ErrorEnvelope, NO_ERROR_CODE_VALUE, NO_ID_VALUE};
use crate::failure::ApiFailure;
use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use serde_json::{Map, Value};
use std::fmt;

/// An error response received from an upstream service.
///
/// It is itself an [`ApiFailure`], so returning it from a handler behind the
/// guard propagates the upstream status, code, correlation id and class name
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientError {
    /// Upstream response status.
    pub status: StatusCode,
    /// Recovered envelope.
    pub envelope: ErrorEnvelope,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.envelope.message)
    }
}

impl std::error::Error for ClientError {}

impl ApiFailure for ClientError {
    fn status(&self) -> Option<StatusCode> {
        Some(self.status)
    }

    fn error_code(&self) -> Option<&str> {
        (self.envelope.error_code != NO_ERROR_CODE_VALUE)
            .then_some(self.envelope.error_code.as_str())
    }

    fn correlation_id(&self) -> Option<&str> {
        (self.envelope.id != NO_ID_VALUE).then_some(self.envelope.id.as_str())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.envelope.timestamp)
    }

    fn extensions(&self) -> Map<String, Value> {
        self.envelope.extensions.clone()
    }

    fn class_name(&self) -> &str {
        &self.envelope.class_name
    }
}

/// Decodes error responses from services speaking the envelope protocol.
///
/// # Example
/// ```
/// use axum_guard::ErrorDecoder;
/// use http::{HeaderMap, StatusCode};
///
/// let body = br#"{"id":"req-9","message":"Order 42 not found","errorCode":"ORDER_NOT_FOUND"}"#;
/// let error = ErrorDecoder::new().decode(StatusCode::NOT_FOUND, &HeaderMap::new(), body);
///
/// assert_eq!(error.status, StatusCode::NOT_FOUND);
/// assert_eq!(error.envelope.id, "req-9");
/// assert_eq!(error.to_string(), "Order 42 not found");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorDecoder {
    codec: EnvelopeCodec,
}

impl ErrorDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a received error response. Never fails.
    pub fn decode(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ClientError {
        let envelope = self.codec.decode(body, headers);
        tracing::debug!(
            status = status.as_u16(),
            id = %envelope.id,
            error_code = %envelope.error_code,
            "Decoded upstream error"
        );
        ClientError { status, envelope }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AcceptedTypes;
    use crate::failure::ErrorEnvelopeBuilder;
    use serde_json::json;

    #[test]
    fn test_decode_each_form() {
        let envelope = ErrorEnvelope::new("Order 42 not found")
            .id("req-1")
            .error_code("ORDER_NOT_FOUND")
            .class_name("shop::OrderMissing")
            .extension("orderId", json!(42));
        let codec = EnvelopeCodec::new();
        let decoder = ErrorDecoder::new();

        for accept in ["application/json", "application/xml", "text/plain"] {
            let encoded = codec.encode(&envelope, &AcceptedTypes::parse(accept));
            let error = decoder.decode(StatusCode::NOT_FOUND, &encoded.headers, &encoded.body);
            assert_eq!(error.envelope.id, "req-1", "{accept}");
            assert_eq!(error.envelope.error_code, "ORDER_NOT_FOUND", "{accept}");
            assert_eq!(error.envelope.class_name, "shop::OrderMissing", "{accept}");
        }
    }

    #[test]
    fn test_foreign_body() {
        let error = ErrorDecoder::new().decode(
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            br#"{"error":"upstream down"}"#,
        );
        assert_eq!(error.envelope.message, r#"{"error":"upstream down"}"#);
        assert_eq!(error.error_code(), None);
        assert_eq!(error.correlation_id(), None);
    }

    #[test]
    fn test_propagates_unchanged() {
        let body = concat!(
            r#"{"id":"req-3","message":"nope","errorCode":"E_NOPE","#,
            r#""className":"billing::Declined","extensions":{"k":"v"}}"#
        )
        .as_bytes();
        let error =
            ErrorDecoder::new().decode(StatusCode::PAYMENT_REQUIRED, &HeaderMap::new(), body);

        let builder = ErrorEnvelopeBuilder::new();
        assert_eq!(builder.detect_status(&error, None), StatusCode::PAYMENT_REQUIRED);

        let rebuilt = builder.build(&error, None, None);
        assert_eq!(rebuilt, error.envelope);
    }
}
