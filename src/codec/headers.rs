//! Header-only envelope form.

use crate::envelope::{
    self, parse_timestamp, ErrorEnvelope, ERROR_CLASS_NAME_HEADER, ERROR_CODE_HEADER,
    ERROR_ID_HEADER, ERROR_MESSAGE_HEADER, ERROR_TIMESTAMP_HEADER, GENERIC_CLASS_NAME,
    NO_ERROR_CODE_VALUE, NO_ID_VALUE, NO_MESSAGE_VALUE,
};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde_json::Map;

/// Mirror every scalar envelope field into `headers`. Blank fields are
/// written as their sentinel.
pub(crate) fn mirror(envelope: &ErrorEnvelope, headers: &mut HeaderMap) {
    let fields = [
        (ERROR_ID_HEADER, envelope.id.as_str(), NO_ID_VALUE),
        (ERROR_MESSAGE_HEADER, envelope.message.as_str(), NO_MESSAGE_VALUE),
        (ERROR_CODE_HEADER, envelope.error_code.as_str(), NO_ERROR_CODE_VALUE),
        (ERROR_CLASS_NAME_HEADER, envelope.class_name.as_str(), GENERIC_CLASS_NAME),
    ];
    headers.insert(
        HeaderName::from_static(ERROR_TIMESTAMP_HEADER),
        header_value(&envelope.timestamp_string(), ""),
    );
    for (name, value, sentinel) in fields {
        headers.insert(HeaderName::from_static(name), header_value(value, sentinel));
    }
}

/// Rebuild an envelope from mirrored headers, using `body` as the message
/// when the message header is missing.
pub(crate) fn read(headers: &HeaderMap, body: &[u8]) -> ErrorEnvelope {
    let message = header(headers, ERROR_MESSAGE_HEADER).or_else(|| {
        let text = String::from_utf8_lossy(body);
        (!text.trim().is_empty()).then(|| text.into_owned())
    });

    ErrorEnvelope {
        id: header(headers, ERROR_ID_HEADER).unwrap_or_else(|| NO_ID_VALUE.to_string()),
        timestamp: header(headers, ERROR_TIMESTAMP_HEADER)
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(envelope::now),
        message: message.unwrap_or_else(|| NO_MESSAGE_VALUE.to_string()),
        error_code: header(headers, ERROR_CODE_HEADER)
            .unwrap_or_else(|| NO_ERROR_CODE_VALUE.to_string()),
        class_name: header(headers, ERROR_CLASS_NAME_HEADER)
            .unwrap_or_else(|| GENERIC_CLASS_NAME.to_string()),
        extensions: Map::new(),
    }
}

// A blank header counts as missing.
fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .filter(|v| !v.trim().is_empty())
}

// Control characters are not allowed in header values.
fn header_value(value: &str, sentinel: &'static str) -> HeaderValue {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if cleaned.trim().is_empty() {
        return HeaderValue::from_static(sentinel);
    }
    HeaderValue::from_bytes(cleaned.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static(sentinel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_mirror_then_read() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let envelope = ErrorEnvelope::new("Order 42 not found")
            .id("req-1")
            .with_timestamp(ts)
            .error_code("ORDER_NOT_FOUND")
            .class_name("shop::OrderMissing");

        let mut headers = HeaderMap::new();
        mirror(&envelope, &mut headers);
        assert_eq!(headers["x-error-timestamp"], "2024-05-01T10:00:00.000Z");

        let read_back = read(&headers, b"ignored body");
        assert_eq!(read_back, envelope);
    }

    #[test]
    fn test_control_characters_replaced() {
        let envelope = ErrorEnvelope::new("line one\nline two\u{7f}");
        let mut headers = HeaderMap::new();
        mirror(&envelope, &mut headers);
        assert_eq!(headers["x-error-message"], "line one line two ");
    }

    #[test]
    fn test_non_ascii_survives() {
        let envelope = ErrorEnvelope::new("Bestellung für Müller");
        let mut headers = HeaderMap::new();
        mirror(&envelope, &mut headers);
        assert_eq!(read(&headers, b"").message, "Bestellung für Müller");
    }

    #[test]
    fn test_read_without_headers() {
        let envelope = read(&HeaderMap::new(), b"");
        assert_eq!(envelope.id, NO_ID_VALUE);
        assert_eq!(envelope.message, NO_MESSAGE_VALUE);
        assert_eq!(envelope.error_code, NO_ERROR_CODE_VALUE);
        assert_eq!(envelope.class_name, GENERIC_CLASS_NAME);

        let envelope = read(&HeaderMap::new(), b"upstream exploded");
        assert_eq!(envelope.message, "upstream exploded");
    }

    #[test]
    fn test_blank_headers_read_as_sentinels() {
        let mut headers = HeaderMap::new();
        headers.insert(ERROR_CODE_HEADER, HeaderValue::from_static(""));
        headers.insert(ERROR_ID_HEADER, HeaderValue::from_static("  "));
        headers.insert(ERROR_MESSAGE_HEADER, HeaderValue::from_static(" "));

        let envelope = read(&headers, b"<<not json or xml>>");
        assert_eq!(envelope.error_code, NO_ERROR_CODE_VALUE);
        assert_eq!(envelope.id, NO_ID_VALUE);
        assert_eq!(envelope.message, "<<not json or xml>>");
    }

    #[test]
    fn test_blank_fields_mirrored_as_sentinels() {
        let envelope = ErrorEnvelope::new("\n").id("").error_code(" ").class_name("");
        let mut headers = HeaderMap::new();
        mirror(&envelope, &mut headers);
        assert_eq!(headers[ERROR_ID_HEADER], NO_ID_VALUE);
        assert_eq!(headers[ERROR_MESSAGE_HEADER], NO_MESSAGE_VALUE);
        assert_eq!(headers[ERROR_CODE_HEADER], NO_ERROR_CODE_VALUE);
        assert_eq!(headers[ERROR_CLASS_NAME_HEADER], GENERIC_CLASS_NAME);
    }

    #[test]
    fn test_bad_timestamp_defaults_to_now() {
        let mut headers = HeaderMap::new();
        headers.insert(ERROR_TIMESTAMP_HEADER, HeaderValue::from_static("last tuesday"));
        let before = envelope::now();
        let envelope = read(&headers, b"");
        assert!(envelope.timestamp >= before);
    }
}
