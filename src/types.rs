//! Core data model shared by the gateway and the backing stores

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum S3 object key length in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Validate a container (bucket) name.
///
/// Follows the S3 DNS-compatible rules loosely: 3-63 characters drawn from
/// lowercase letters, digits, `.`, `-` and `_`, starting and ending with a
/// letter or digit.
pub fn validate_bucket_name(name: &str) -> Result<(), KeyValidationError> {
    if !(3..=63).contains(&name.len()) {
        return Err(KeyValidationError(
            "Bucket name must be between 3 and 63 characters long".to_string(),
        ));
    }
    let valid_char =
        |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_');
    if !name.chars().all(valid_char) {
        return Err(KeyValidationError(
            "Bucket name contains invalid characters".to_string(),
        ));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(KeyValidationError(
            "Bucket name must start and end with a letter or digit".to_string(),
        ));
    }
    if name.contains("..") {
        return Err(KeyValidationError(
            "Bucket name must not contain consecutive periods".to_string(),
        ));
    }
    Ok(())
}

/// Validate an object key for object operations.
pub fn validate_key(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError(
            "Object key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyValidationError(format!(
            "Object key must not exceed {} bytes",
            MAX_KEY_LEN
        )));
    }
    if key.contains('\0') {
        return Err(KeyValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    Ok(())
}

/// Client-writable content metadata of a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// `x-amz-meta-*` pairs, keys lowercased and without the prefix
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

/// External view of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub container: String,
    pub key: String,
    pub content_length: u64,
    /// Unquoted ETag (MD5 hex, or `<hex>-<parts>` for multipart objects)
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: ContentMetadata,
}

impl BlobDescriptor {
    /// ETag as sent on the wire (double-quoted).
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    pub fn summary(&self) -> BlobSummary {
        BlobSummary {
            key: self.key.clone(),
            size: self.content_length,
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// Listing entry for a single blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSummary {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

/// A parsed `Range: bytes=...` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n` (last n bytes)
    Suffix(u64),
}

impl ByteRange {
    /// Parse a Range header value. Returns `None` for anything that is not a
    /// single well-formed byte range; S3 ignores such headers.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().ok().map(ByteRange::Suffix),
            (false, true) => start.parse().ok().map(ByteRange::From),
            (false, false) => {
                let a: u64 = start.parse().ok()?;
                let b: u64 = end.parse().ok()?;
                (a <= b).then_some(ByteRange::FromTo(a, b))
            }
            (true, true) => None,
        }
    }

    /// Resolve against an object length into an inclusive `(first, last)`
    /// pair, or `None` when the range is unsatisfiable.
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        if len == 0 {
            return None;
        }
        match *self {
            ByteRange::FromTo(a, b) if a < len => Some((a, b.min(len - 1))),
            ByteRange::From(a) if a < len => Some((a, len - 1)),
            ByteRange::Suffix(n) if n > 0 => Some((len.saturating_sub(n), len - 1)),
            _ => None,
        }
    }
}

/// Conditional write constraints from `If-Match` / `If-None-Match`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutCondition {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

impl PutCondition {
    pub fn is_empty(&self) -> bool {
        self.if_match.is_none() && self.if_none_match.is_none()
    }

    /// Whether a write may proceed given the ETag of the current blob, if any.
    pub fn allows(&self, existing_etag: Option<&str>) -> bool {
        if let Some(ref expected) = self.if_match {
            match existing_etag {
                Some(current) if etag_matches(expected, current) => {}
                _ => return false,
            }
        }
        if let Some(ref rejected) = self.if_none_match {
            if let Some(current) = existing_etag {
                if rejected.trim() == "*" || etag_matches(rejected, current) {
                    return false;
                }
            }
        }
        true
    }
}

/// `x-amz-metadata-directive` for CopyObject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDirective {
    /// Keep the source blob's metadata
    Copy,
    /// Replace with the metadata supplied on the copy request
    Replace(ContentMetadata),
}

/// Strip quotes and a weak-validator prefix from an ETag.
pub fn normalize_etag(etag: &str) -> &str {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"')
}

/// Compare an ETag list header value (`"a", "b"` or `*`) against a stored ETag.
pub fn etag_matches(header: &str, current: &str) -> bool {
    header
        .split(',')
        .map(normalize_etag)
        .any(|candidate| candidate == "*" || candidate == normalize_etag(current))
}

/// Format a timestamp as an RFC 7231 HTTP-date.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Format a timestamp the way S3 XML bodies do.
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse an HTTP-date (RFC 1123 / RFC 2822 form).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse an ISO 8601 basic timestamp (`20130524T000000Z`).
pub fn parse_amz_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_validation() {
        assert!(validate_bucket_name("my-bucket").is_ok());
        assert!(validate_bucket_name("logs.2024").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("UpperCase").is_err());
        assert!(validate_bucket_name("-leading").is_err());
        assert!(validate_bucket_name("a..b").is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("a/b/c.txt").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("bad\0key").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_byte_range_parse() {
        assert_eq!(ByteRange::parse("bytes=0-9"), Some(ByteRange::FromTo(0, 9)));
        assert_eq!(ByteRange::parse("bytes=5-"), Some(ByteRange::From(5)));
        assert_eq!(ByteRange::parse("bytes=-3"), Some(ByteRange::Suffix(3)));
        assert_eq!(ByteRange::parse("bytes=9-1"), None);
        assert_eq!(ByteRange::parse("bytes=0-1,4-5"), None);
        assert_eq!(ByteRange::parse("items=0-1"), None);
    }

    #[test]
    fn test_byte_range_resolve() {
        assert_eq!(ByteRange::FromTo(0, 9).resolve(100), Some((0, 9)));
        assert_eq!(ByteRange::FromTo(90, 200).resolve(100), Some((90, 99)));
        assert_eq!(ByteRange::From(100).resolve(100), None);
        assert_eq!(ByteRange::Suffix(10).resolve(4), Some((0, 3)));
        assert_eq!(ByteRange::Suffix(0).resolve(4), None);
        assert_eq!(ByteRange::From(0).resolve(0), None);
    }

    #[test]
    fn test_put_condition() {
        let none_match_any = PutCondition {
            if_none_match: Some("*".to_string()),
            ..Default::default()
        };
        assert!(none_match_any.allows(None));
        assert!(!none_match_any.allows(Some("abc")));

        let if_match = PutCondition {
            if_match: Some("\"abc\"".to_string()),
            ..Default::default()
        };
        assert!(if_match.allows(Some("abc")));
        assert!(!if_match.allows(Some("def")));
        assert!(!if_match.allows(None));
    }

    #[test]
    fn test_http_dates() {
        let dt = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(format_http_date(&dt), "Sun, 06 Nov 1994 08:49:37 GMT");
        let amz = parse_amz_date("20130524T000000Z").unwrap();
        assert_eq!(format_iso8601(&amz), "2013-05-24T00:00:00.000Z");
    }

    #[test]
    fn test_descriptor_serialization_flattens_metadata() {
        let desc = BlobDescriptor {
            container: "c".to_string(),
            key: "k".to_string(),
            content_length: 3,
            etag: "abc".to_string(),
            last_modified: Utc::now(),
            metadata: ContentMetadata {
                content_type: Some("text/plain".to_string()),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains("\"content_type\":\"text/plain\""));
        let parsed: BlobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, desc);
        assert_eq!(parsed.quoted_etag(), "\"abc\"");
    }
}
