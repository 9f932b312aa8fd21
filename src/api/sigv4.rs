//! AWS Signature Version 4 (SigV4) verification
//!
//! Covers both the `Authorization: AWS4-HMAC-SHA256 ...` header form and
//! presigned URLs (`X-Amz-Signature` and friends in the query string).
//!
//! The verifier reconstructs the canonical request from the incoming HTTP
//! request, derives the signing key from the tenant's secret through the
//! date → region → service → `aws4_request` HMAC chain, and compares the
//! computed signature against the one provided by the client in constant
//! time.

use super::auth::SignedRequest;
use super::S3Error;
use crate::types::parse_amz_date;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Longest validity a presigned URL may request (7 days).
pub const MAX_PRESIGNED_EXPIRES: u64 = 7 * 24 * 3600;

/// Signature material from either the header or the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V4Credentials {
    pub access_key: String,
    /// `YYYYMMDD` from the credential scope
    pub date: String,
    pub region: String,
    pub service: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
    /// `X-Amz-Date` (presigned) or empty for the header form
    pub timestamp: Option<String>,
    /// Validity window in seconds for presigned URLs
    pub expires: Option<u64>,
}

impl V4Credentials {
    pub fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date, self.region, self.service
        )
    }

    pub fn is_presigned(&self) -> bool {
        self.expires.is_some()
    }
}

fn malformed(msg: &str) -> S3Error {
    S3Error::AuthorizationHeaderMalformed(msg.to_string())
}

/// Split `AKID/date/region/service/aws4_request`.
fn parse_credential(credential: &str) -> Result<(String, String, String, String), S3Error> {
    let parts: Vec<&str> = credential.trim().splitn(5, '/').collect();
    if parts.len() != 5 || parts[4] != "aws4_request" || parts[0].is_empty() {
        return Err(malformed("the Credential is mal-formed"));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
        parts[3].to_string(),
    ))
}

/// Parse the Authorization header value.
///
/// Format: `AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...`
pub fn parse_authorization(header: &str) -> Result<V4Credentials, S3Error> {
    let rest = header
        .trim()
        .strip_prefix(ALGORITHM)
        .ok_or_else(|| malformed("unsupported algorithm"))?
        .trim();

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim());
        }
    }

    let credential = credential.ok_or_else(|| malformed("missing Credential"))?;
    let signed_headers = signed_headers.ok_or_else(|| malformed("missing SignedHeaders"))?;
    let signature = signature.ok_or_else(|| malformed("missing Signature"))?;
    let (access_key, date, region, service) = parse_credential(credential)?;

    Ok(V4Credentials {
        access_key,
        date,
        region,
        service,
        signed_headers: split_signed_headers(signed_headers),
        signature: signature.to_string(),
        timestamp: None,
        expires: None,
    })
}

/// Whether the query string carries presigned V4 parameters.
pub fn is_presigned(query: &[(String, String)]) -> bool {
    query.iter().any(|(k, _)| k == "X-Amz-Algorithm")
}

/// Parse presigned URL query parameters (already percent-decoded).
pub fn parse_presigned(query: &[(String, String)]) -> Result<V4Credentials, S3Error> {
    let param = |name: &str| {
        query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| {
                S3Error::AuthorizationHeaderMalformed(format!(
                    "Query-string authentication requires the {} parameter",
                    name
                ))
            })
    };

    if param("X-Amz-Algorithm")? != ALGORITHM {
        return Err(malformed("unsupported algorithm"));
    }
    let (access_key, date, region, service) = parse_credential(param("X-Amz-Credential")?)?;
    let expires: u64 = param("X-Amz-Expires")?
        .parse()
        .map_err(|_| S3Error::InvalidArgument("X-Amz-Expires should be a number".to_string()))?;
    if expires > MAX_PRESIGNED_EXPIRES {
        return Err(S3Error::InvalidArgument(
            "X-Amz-Expires must be less than a week (in seconds) that is 604800".to_string(),
        ));
    }

    Ok(V4Credentials {
        access_key,
        date,
        region,
        service,
        signed_headers: split_signed_headers(param("X-Amz-SignedHeaders")?),
        signature: param("X-Amz-Signature")?.to_string(),
        timestamp: Some(param("X-Amz-Date")?.to_string()),
        expires: Some(expires),
    })
}

fn split_signed_headers(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

/// Verify a V4 request, returning the string that was signed.
pub fn verify(
    request: &SignedRequest<'_>,
    credentials: &V4Credentials,
    secret_access_key: &str,
    now: DateTime<Utc>,
    clock_skew: Duration,
) -> Result<String, S3Error> {
    let timestamp = match credentials.timestamp {
        Some(ref ts) => ts.clone(),
        None => request
            .header("x-amz-date")
            .or_else(|| request.header("date"))
            .ok_or(S3Error::AccessDenied)?
            .to_string(),
    };
    let signed_at = parse_amz_date(&timestamp)
        .or_else(|| crate::types::parse_http_date(&timestamp))
        .ok_or_else(|| malformed("invalid request date"))?;

    if !credentials.signed_headers.iter().any(|h| h == "host") {
        return Err(malformed("the host header must be signed"));
    }

    match credentials.expires {
        Some(expires) => {
            if signed_at - clock_skew > now {
                debug!("SigV4: presigned URL dated {} is in the future", timestamp);
                return Err(S3Error::RequestNotYetValid);
            }
            if now > signed_at + Duration::seconds(expires as i64) {
                debug!("SigV4: presigned URL expired at +{}s", expires);
                return Err(S3Error::RequestExpired);
            }
        }
        None => {
            if (now - signed_at).abs() > clock_skew {
                return Err(S3Error::RequestTimeTooSkewed);
            }
        }
    }
    if signed_at.format("%Y%m%d").to_string() != credentials.date {
        return Err(malformed("credential date does not match the request date"));
    }

    let payload_hash = if credentials.is_presigned() {
        request
            .query_param("X-Amz-Content-Sha256")
            .unwrap_or(UNSIGNED_PAYLOAD)
            .to_string()
    } else {
        request
            .header("x-amz-content-sha256")
            .unwrap_or(UNSIGNED_PAYLOAD)
            .to_string()
    };

    let canonical = canonical_request(
        request,
        &credentials.signed_headers,
        &payload_hash,
        credentials.is_presigned(),
    );
    debug!("SigV4 canonical request:\n{}", canonical);

    let sts = string_to_sign(&timestamp_basic(&timestamp, signed_at), &credentials.credential_scope(), &canonical);
    debug!("SigV4 string to sign:\n{}", sts);

    let key = derive_signing_key(
        secret_access_key,
        &credentials.date,
        &credentials.region,
        &credentials.service,
    );
    let expected = hex::encode(hmac_sha256(&key, sts.as_bytes()));

    if expected
        .as_bytes()
        .ct_eq(credentials.signature.as_bytes())
        .into()
    {
        Ok(sts)
    } else {
        debug!(
            "SigV4: signature mismatch for {} (computed {}...)",
            credentials.access_key,
            &expected[..8]
        );
        Err(S3Error::SignatureDoesNotMatch)
    }
}

/// The string-to-sign carries the timestamp exactly as the client sent it in
/// basic ISO 8601 form; an HTTP-date fallback is converted.
fn timestamp_basic(raw: &str, parsed: DateTime<Utc>) -> String {
    if parse_amz_date(raw).is_some() {
        raw.trim().to_string()
    } else {
        parsed.format("%Y%m%dT%H%M%SZ").to_string()
    }
}

/// Build the canonical request.
pub fn canonical_request(
    request: &SignedRequest<'_>,
    signed_headers: &[String],
    payload_hash: &str,
    presigned: bool,
) -> String {
    let mut canonical_headers = String::new();
    for name in signed_headers {
        let values: Vec<String> = request
            .headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&values.join(","));
        canonical_headers.push('\n');
    }

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.path),
        canonical_query_string(request.query, presigned),
        canonical_headers,
        signed_headers.join(";"),
        payload_hash
    )
}

pub fn string_to_sign(timestamp: &str, credential_scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

/// Hex signature of a string-to-sign.
pub fn sign(secret_access_key: &str, date: &str, region: &str, service: &str, sts: &str) -> String {
    let key = derive_signing_key(secret_access_key, date, region, service);
    hex::encode(hmac_sha256(&key, sts.as_bytes()))
}

/// Check `x-amz-content-sha256` against the received body when it names a
/// concrete digest rather than an unsigned or streaming token.
pub fn verify_payload_hash(declared: Option<&str>, body: &[u8]) -> Result<(), S3Error> {
    let Some(declared) = declared else {
        return Ok(());
    };
    let is_digest = declared.len() == 64 && declared.bytes().all(|b| b.is_ascii_hexdigit());
    if !is_digest {
        return Ok(());
    }
    let actual = hex::encode(Sha256::digest(body));
    if actual.eq_ignore_ascii_case(declared) {
        Ok(())
    } else {
        Err(S3Error::XAmzContentSHA256Mismatch)
    }
}

/// Canonical URI: decode the raw path, then encode each segment once.
fn canonical_uri(raw_path: &str) -> String {
    let path = if raw_path.is_empty() { "/" } else { raw_path };
    path.split('/')
        .map(|segment| uri_encode(&percent_decode(segment), true))
        .collect::<Vec<_>>()
        .join("/")
}

/// Build sorted canonical query string from raw query.
fn canonical_query_string(query: &str, skip_signature: bool) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            // Decode first, then re-encode to normalize
            (
                uri_encode(&percent_decode(k), true),
                uri_encode(&percent_decode(v), true),
            )
        })
        .filter(|(k, _)| !(skip_signature && k == "X-Amz-Signature"))
        .collect();

    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-decode a URI component (e.g. `%2F` → `/`).
pub(crate) fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

/// URI-encode a string per SigV4 (RFC 3986).
/// Unreserved characters: A-Z a-z 0-9 - _ . ~
pub(crate) fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => {
                encoded.push('/');
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

/// Derive the SigV4 signing key.
fn derive_signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{}", secret_access_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
