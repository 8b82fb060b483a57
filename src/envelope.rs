//! The canonical error envelope.
//!
//! Every failure the guard reports, and every failure a client decodes, ends
//! up as an [`ErrorEnvelope`]. Fields that could not be determined carry a
//! sentinel value instead of being absent.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel for an unknown correlation id.
pub const NO_ID_VALUE: &str = "UNSPECIFIED";

/// Sentinel for a failure without a message.
pub const NO_MESSAGE_VALUE: &str = "No message present.";

/// Sentinel for a failure without an error code.
pub const NO_ERROR_CODE_VALUE: &str = "UNSPECIFIED";

/// Class name used when the failure type is unknown.
pub const GENERIC_CLASS_NAME: &str = "std::error::Error";

/// Extension key holding field-level validation detail.
pub const VALIDATION_ERRORS_KEY: &str = "validationErrors";

/// Header mirroring [`ErrorEnvelope::id`].
pub const ERROR_ID_HEADER: &str = "x-error-id";
/// Header mirroring [`ErrorEnvelope::timestamp`].
pub const ERROR_TIMESTAMP_HEADER: &str = "x-error-timestamp";
/// Header mirroring [`ErrorEnvelope::message`].
pub const ERROR_MESSAGE_HEADER: &str = "x-error-message";
/// Header mirroring [`ErrorEnvelope::error_code`].
pub const ERROR_CODE_HEADER: &str = "x-error-code";
/// Header mirroring [`ErrorEnvelope::class_name`].
pub const ERROR_CLASS_NAME_HEADER: &str = "x-error-class-name";

const ALTERNATE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// A failure in its transport-independent form.
///
/// # Example
/// ```
/// use axum_guard::{ErrorEnvelope, NO_ID_VALUE};
///
/// let envelope = ErrorEnvelope::new("Order 42 not found").error_code("ORDER_NOT_FOUND");
/// assert_eq!(envelope.id, NO_ID_VALUE);
/// assert_eq!(envelope.error_code, "ORDER_NOT_FOUND");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Correlation id, or [`NO_ID_VALUE`].
    pub id: String,
    // Always millisecond precision so the wire forms reproduce it.
    #[serde(serialize_with = "serialize_timestamp")]
    pub(crate) timestamp: DateTime<Utc>,
    /// Human readable message, or [`NO_MESSAGE_VALUE`].
    pub message: String,
    /// Stable machine readable code, or [`NO_ERROR_CODE_VALUE`].
    pub error_code: String,
    /// Type name of the failure, or [`GENERIC_CLASS_NAME`].
    pub class_name: String,
    /// Extra detail, in insertion order.
    pub extensions: Map<String, Value>,
}

impl Default for ErrorEnvelope {
    fn default() -> Self {
        Self {
            id: NO_ID_VALUE.to_string(),
            timestamp: now(),
            message: NO_MESSAGE_VALUE.to_string(),
            error_code: NO_ERROR_CODE_VALUE.to_string(),
            class_name: GENERIC_CLASS_NAME.to_string(),
            extensions: Map::new(),
        }
    }
}

impl ErrorEnvelope {
    /// An envelope with `message` and sentinels everywhere else.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the timestamp, truncated to milliseconds.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }

    /// When the failure happened, UTC, millisecond precision.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Set the error code.
    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = code.into();
        self
    }

    /// Set the class name.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    /// Append an extension entry.
    pub fn extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Whether the id is still the sentinel.
    pub fn has_id(&self) -> bool {
        self.id != NO_ID_VALUE
    }

    /// The timestamp in wire form.
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Current time truncated to milliseconds.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Format a timestamp as RFC 3339 UTC with millisecond precision.
///
/// # Example
/// ```
/// use axum_guard::format_timestamp;
/// use chrono::{TimeZone, Utc};
///
/// let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
/// assert_eq!(format_timestamp(&ts), "2024-05-01T10:00:00.000Z");
/// ```
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire timestamp. Accepts RFC 3339 and `%Y-%m-%dT%H:%M:%S%.3f%z`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, ALTERNATE_TIMESTAMP_FORMAT))
        .map(|ts| ts.with_timezone(&Utc).trunc_subsecs(3))
        .ok()
        .or_else(|| {
            // Zone-less local form, read as UTC
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc().trunc_subsecs(3))
        })
}

fn serialize_timestamp<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_timestamp(timestamp))
}

/// The JSON wire shape. Every field is optional, unknown fields are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct WireEnvelope {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    pub error_code: Option<String>,
    pub class_name: Option<String>,
    pub extensions: Option<Map<String, Value>>,
}

impl From<WireEnvelope> for ErrorEnvelope {
    fn from(wire: WireEnvelope) -> Self {
        Self {
            id: wire.id.unwrap_or_else(|| NO_ID_VALUE.to_string()),
            timestamp: wire
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(now),
            message: wire.message.unwrap_or_else(|| NO_MESSAGE_VALUE.to_string()),
            error_code: wire
                .error_code
                .unwrap_or_else(|| NO_ERROR_CODE_VALUE.to_string()),
            class_name: wire
                .class_name
                .unwrap_or_else(|| GENERIC_CLASS_NAME.to_string()),
            extensions: wire.extensions.unwrap_or_default(),
        }
    }
}
