//! Envelope serialization and best-effort parsing.
//!
//! Encoding follows content negotiation: JSON when acceptable, else XML, else
//! the message as plain text with every field mirrored into `X-ERROR-*`
//! headers. Decoding tries the same forms in the same order and always
//! produces an envelope.

mod headers;
mod media;
mod xml;

pub use media::{AcceptedTypes, MediaRange};

use crate::envelope::{ErrorEnvelope, WireEnvelope};
use crate::error::CodecError;
use axum::body::Body;
use axum::response::Response;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An encoded envelope, ready to become a response.
#[derive(Debug, Clone)]
pub struct EncodedEnvelope {
    /// Negotiated content type.
    pub content_type: HeaderValue,
    /// Extra headers (the mirrored fields for the plain-text form).
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

impl EncodedEnvelope {
    /// Build a response with `status`.
    pub fn into_response(self, status: StatusCode) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.extend(self.headers);
        headers.insert(CONTENT_TYPE, self.content_type);
        response
    }
}

/// Encodes and decodes [`ErrorEnvelope`]s.
///
/// # Example
/// ```
/// use axum_guard::{AcceptedTypes, EnvelopeCodec, ErrorEnvelope};
/// use http::HeaderMap;
///
/// let codec = EnvelopeCodec::new();
/// let envelope = ErrorEnvelope::new("Order 42 not found").id("req-1");
///
/// let encoded = codec.encode(&envelope, &AcceptedTypes::parse("application/json"));
/// assert_eq!(encoded.content_type, "application/json");
///
/// let decoded = codec.decode(&encoded.body, &encoded.headers);
/// assert_eq!(decoded, envelope);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode `envelope` in the best form `accepted` allows.
    pub fn encode(&self, envelope: &ErrorEnvelope, accepted: &AcceptedTypes) -> EncodedEnvelope {
        if accepted.accepts_json() {
            match serde_json::to_vec(envelope) {
                Ok(body) => return structured(accepted.json_content_type(), body),
                Err(e) => {
                    tracing::warn!(error = %e, "JSON envelope encoding failed, trying next form")
                }
            }
        }

        if accepted.accepts_xml() {
            match xml::encode(envelope) {
                Ok(body) => return structured(accepted.xml_content_type(), body),
                Err(e) => {
                    tracing::warn!(error = %e, "XML envelope encoding failed, trying next form")
                }
            }
        }

        let mut headers = HeaderMap::new();
        headers::mirror(envelope, &mut headers);
        EncodedEnvelope {
            content_type: HeaderValue::from_static(TEXT_CONTENT_TYPE),
            headers,
            body: envelope.message.clone().into_bytes(),
        }
    }

    /// Recover an envelope from any error response. Never fails.
    pub fn decode(&self, body: &[u8], headers: &HeaderMap) -> ErrorEnvelope {
        match decode_json(body) {
            Ok(envelope) => return envelope,
            Err(e) => tracing::debug!(error = %e, "Body is not a JSON envelope"),
        }

        match xml::decode(body) {
            Ok(envelope) => return envelope,
            Err(e) => tracing::debug!(error = %e, "Body is not an XML envelope"),
        }

        headers::read(headers, body)
    }
}

fn decode_json(body: &[u8]) -> Result<ErrorEnvelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_slice(body)?;
    Ok(wire.into())
}

fn structured(content_type: String, body: Vec<u8>) -> EncodedEnvelope {
    let content_type = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    EncodedEnvelope {
        content_type,
        headers: HeaderMap::new(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{
        ERROR_CODE_HEADER, ERROR_MESSAGE_HEADER, GENERIC_CLASS_NAME, NO_ERROR_CODE_VALUE,
        NO_ID_VALUE, NO_MESSAGE_VALUE,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn populated() -> ErrorEnvelope {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        ErrorEnvelope::new("Order 42 not found")
            .id("req-1")
            .with_timestamp(ts)
            .error_code("ORDER_NOT_FOUND")
            .class_name("shop::OrderMissing")
            .extension("orderId", json!(42))
            .extension("validationErrors", json!([{"field": "qty", "message": "must be positive"}]))
    }

    #[test]
    fn test_negotiation_order() {
        let codec = EnvelopeCodec::new();
        let envelope = populated();

        let accepted = AcceptedTypes::parse("application/xml, application/json");
        let json = codec.encode(&envelope, &accepted);
        assert_eq!(json.content_type, "application/json");

        let xml = codec.encode(&envelope, &AcceptedTypes::parse("application/xml"));
        assert_eq!(xml.content_type, "application/xml");
        assert!(xml.body.starts_with(b"<?xml"));

        let text = codec.encode(&envelope, &AcceptedTypes::parse("text/plain"));
        assert_eq!(text.content_type, TEXT_CONTENT_TYPE);
        assert_eq!(text.body, b"Order 42 not found");
        assert_eq!(text.headers[ERROR_CODE_HEADER], "ORDER_NOT_FOUND");
        assert_eq!(text.headers.len(), 5);
    }

    #[test]
    fn test_structured_round_trip() {
        let codec = EnvelopeCodec::new();
        let envelope = populated();
        for accept in ["application/json", "application/xml"] {
            let encoded = codec.encode(&envelope, &AcceptedTypes::parse(accept));
            let decoded = codec.decode(&encoded.body, &HeaderMap::new());
            assert_eq!(decoded, envelope, "{accept}");
            assert_eq!(
                decoded.extensions.keys().collect::<Vec<_>>(),
                vec!["orderId", "validationErrors"]
            );
        }
    }

    #[test]
    fn test_sub_millisecond_timestamp_round_trip() {
        let codec = EnvelopeCodec::new();
        let precise = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 1).unwrap()
            + chrono::Duration::nanoseconds(433_214_483);
        let envelope = populated().with_timestamp(precise);
        assert_eq!(envelope.timestamp().timestamp_subsec_nanos(), 433_000_000);

        for accept in ["application/json", "application/xml", "text/plain"] {
            let encoded = codec.encode(&envelope, &AcceptedTypes::parse(accept));
            let decoded = codec.decode(&encoded.body, &encoded.headers);
            assert_eq!(decoded.timestamp(), envelope.timestamp(), "{accept}");
        }
    }

    #[test]
    fn test_deeply_nested_xml_falls_back_to_headers() {
        let mut body = String::from(r#"<errorEnvelope><extensions><entry key="a">"#);
        body.push_str(&"<array>".repeat(200_000));

        let envelope = EnvelopeCodec::new().decode(body.as_bytes(), &HeaderMap::new());
        assert_eq!(envelope.error_code, NO_ERROR_CODE_VALUE);
        assert_eq!(envelope.message, body);
    }

    #[test]
    fn test_header_form_round_trip_drops_extensions() {
        let codec = EnvelopeCodec::new();
        let envelope = populated();
        let encoded = codec.encode(&envelope, &AcceptedTypes::parse("text/html"));
        let decoded = codec.decode(&encoded.body, &encoded.headers);
        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.timestamp, envelope.timestamp);
        assert_eq!(decoded.message, envelope.message);
        assert_eq!(decoded.class_name, envelope.class_name);
        assert!(decoded.extensions.is_empty());
    }

    #[test]
    fn test_decode_foreign_json_uses_body_as_message() {
        let codec = EnvelopeCodec::new();
        let body = br#"{"error":"bad gateway"}"#;
        let envelope = codec.decode(body, &HeaderMap::new());
        assert_eq!(envelope.message, r#"{"error":"bad gateway"}"#);
        assert_eq!(envelope.id, NO_ID_VALUE);
        assert_eq!(envelope.class_name, GENERIC_CLASS_NAME);
    }

    #[test]
    fn test_decode_empty_response() {
        let codec = EnvelopeCodec::new();
        let envelope = codec.decode(b"", &HeaderMap::new());
        assert_eq!(envelope.message, NO_MESSAGE_VALUE);

        let mut headers = HeaderMap::new();
        headers.insert(ERROR_MESSAGE_HEADER, HeaderValue::from_static("from header"));
        let envelope = codec.decode(b"<html>oops</html>", &headers);
        assert_eq!(envelope.message, "from header");
    }

    #[test]
    fn test_into_response() {
        let encoded =
            EnvelopeCodec::new().encode(&populated(), &AcceptedTypes::parse("text/plain"));
        let response = encoded.into_response(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_CONTENT_TYPE);
        assert_eq!(response.headers()["x-error-id"], "req-1");
    }
}
