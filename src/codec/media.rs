//! `Accept` header parsing.

use http::header::ACCEPT;
use http::HeaderMap;

/// One media range from an `Accept` header, lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRange {
    /// Top-level type, possibly `*`.
    pub kind: String,
    /// Subtype, possibly `*`.
    pub subtype: String,
}

impl MediaRange {
    fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.split(';');
        let media = parts.next()?.trim().to_ascii_lowercase();

        // q=0 means "not acceptable"
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("q") {
                let q: f32 = value.trim().parse().ok()?;
                if q <= 0.0 {
                    return None;
                }
            }
        }

        if media == "*" {
            return Some(Self::any());
        }
        let (kind, subtype) = media.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            subtype: subtype.to_string(),
        })
    }

    fn any() -> Self {
        Self {
            kind: "*".to_string(),
            subtype: "*".to_string(),
        }
    }

    fn is_concrete(&self) -> bool {
        self.kind != "*" && self.subtype != "*"
    }

    fn accepts_json(&self) -> bool {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") | ("application", "*") => true,
            (_, subtype) => subtype == "json" || subtype.ends_with("+json"),
        }
    }

    fn accepts_xml(&self) -> bool {
        self.subtype == "xml" || self.subtype.ends_with("+xml")
    }

    fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }
}

/// The media ranges a caller accepts.
///
/// # Example
/// ```
/// use axum_guard::AcceptedTypes;
///
/// let accepted = AcceptedTypes::parse("application/xml, application/json;q=0");
/// assert!(!accepted.accepts_json());
/// assert!(accepted.accepts_xml());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTypes {
    ranges: Vec<MediaRange>,
}

impl Default for AcceptedTypes {
    fn default() -> Self {
        Self::any()
    }
}

impl AcceptedTypes {
    /// Accept everything (`*/*`).
    pub fn any() -> Self {
        Self {
            ranges: vec![MediaRange::any()],
        }
    }

    /// Parse an `Accept` header value. An empty value accepts everything.
    pub fn parse(header: &str) -> Self {
        if header.trim().is_empty() {
            return Self::any();
        }
        Self {
            ranges: header
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .filter_map(MediaRange::parse)
                .collect(),
        }
    }

    /// Read every `Accept` header in `headers`. None means `*/*`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let values: Vec<String> = headers
            .get_all(ACCEPT)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        Self::parse(&values.join(","))
    }

    /// The accepted ranges, in header order.
    pub fn ranges(&self) -> &[MediaRange] {
        &self.ranges
    }

    /// Whether a JSON body is acceptable.
    pub fn accepts_json(&self) -> bool {
        self.ranges.iter().any(MediaRange::accepts_json)
    }

    /// Whether an XML body is acceptable.
    pub fn accepts_xml(&self) -> bool {
        self.ranges.iter().any(MediaRange::accepts_xml)
    }

    pub(crate) fn json_content_type(&self) -> String {
        self.preferred(MediaRange::accepts_json, "application/json")
    }

    pub(crate) fn xml_content_type(&self) -> String {
        self.preferred(MediaRange::accepts_xml, "application/xml")
    }

    // Echo a concrete accepted type (`application/problem+json`), else the default.
    fn preferred(&self, accepts: fn(&MediaRange) -> bool, default: &str) -> String {
        self.ranges
            .iter()
            .find(|r| r.is_concrete() && accepts(r))
            .map(MediaRange::essence)
            .unwrap_or_else(|| default.to_string())
    }
}
