//! AWS Signature Version 2 verification.
//!
//! The `Authorization` header has the form `AWS <AccessKeyId>:<Signature>`;
//! presigned URLs carry `AWSAccessKeyId`, `Expires` and `Signature` in the
//! query string instead. In both cases
//! `Signature = Base64(HMAC-SHA1(SecretKey, StringToSign))` with:
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Date (or Expires) + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```

use super::auth::SignedRequest;
use super::S3Error;
use crate::types::parse_http_date;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

/// Query parameters that are part of the canonicalized resource.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Credentials {
    pub access_key: String,
    pub signature: String,
    /// Epoch seconds from a presigned URL's `Expires`
    pub expires: Option<i64>,
}

/// Check whether the `Authorization` header uses SigV2 format (`AWS AKID:sig`).
pub fn is_v2_header(header: &str) -> bool {
    header.starts_with("AWS ") && !header.starts_with("AWS4-")
}

/// Parse a SigV2 `Authorization` header: `AWS AKID:Signature`.
pub fn parse_authorization(header: &str) -> Result<V2Credentials, S3Error> {
    let rest = header
        .strip_prefix("AWS ")
        .ok_or_else(|| S3Error::AuthorizationHeaderMalformed("expected AWS AKID:signature".into()))?;
    let (access_key, signature) = rest
        .trim()
        .split_once(':')
        .filter(|(k, s)| !k.is_empty() && !s.is_empty())
        .ok_or_else(|| S3Error::AuthorizationHeaderMalformed("expected AWS AKID:signature".into()))?;
    Ok(V2Credentials {
        access_key: access_key.to_string(),
        signature: signature.to_string(),
        expires: None,
    })
}

/// Whether the query string carries presigned V2 parameters.
pub fn is_presigned(query: &[(String, String)]) -> bool {
    query.iter().any(|(k, _)| k == "AWSAccessKeyId")
        && query.iter().any(|(k, _)| k == "Signature")
}

pub fn parse_presigned(query: &[(String, String)]) -> Result<V2Credentials, S3Error> {
    let param = |name: &str| {
        query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                S3Error::AuthorizationHeaderMalformed(format!(
                    "Query-string authentication requires the {} parameter",
                    name
                ))
            })
    };
    let expires = param("Expires")?
        .parse()
        .map_err(|_| S3Error::InvalidArgument("Expires should be epoch seconds".to_string()))?;
    Ok(V2Credentials {
        access_key: param("AWSAccessKeyId")?,
        signature: param("Signature")?,
        expires: Some(expires),
    })
}

/// Verify a V2 request, returning the string that was signed.
///
/// `virtual_bucket` is the bucket taken from the Host header when
/// virtual-host addressing is in effect; V2 signs it as a path prefix.
pub fn verify(
    request: &SignedRequest<'_>,
    credentials: &V2Credentials,
    secret_access_key: &str,
    virtual_bucket: Option<&str>,
    now: DateTime<Utc>,
    clock_skew: Duration,
) -> Result<String, S3Error> {
    let date_line = match credentials.expires {
        Some(expires) => {
            if now.timestamp() > expires {
                debug!("SigV2: presigned URL expired at {}", expires);
                return Err(S3Error::RequestExpired);
            }
            expires.to_string()
        }
        None => {
            let raw = request
                .header("x-amz-date")
                .or_else(|| request.header("date"))
                .ok_or(S3Error::AccessDenied)?;
            let signed_at = parse_http_date(raw)
                .or_else(|| crate::types::parse_amz_date(raw))
                .ok_or(S3Error::AccessDenied)?;
            if (now - signed_at).abs() > clock_skew {
                return Err(S3Error::RequestTimeTooSkewed);
            }
            // With x-amz-date present, the Date line is empty
            if request.header("x-amz-date").is_some() {
                String::new()
            } else {
                raw.to_string()
            }
        }
    };

    let sts = string_to_sign(request, &date_line, virtual_bucket);
    debug!("SigV2 string to sign: {:?}", sts);

    let expected = sign(secret_access_key, &sts);
    if expected
        .as_bytes()
        .ct_eq(credentials.signature.as_bytes())
        .into()
    {
        Ok(sts)
    } else {
        debug!("SigV2: signature mismatch for {}", credentials.access_key);
        Err(S3Error::SignatureDoesNotMatch)
    }
}

/// Build the SigV2 string to sign.
pub fn string_to_sign(request: &SignedRequest<'_>, date_line: &str, virtual_bucket: Option<&str>) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}{}",
        request.method,
        request.header("content-md5").unwrap_or(""),
        request.header("content-type").unwrap_or(""),
        date_line,
        canonicalized_amz_headers(request),
        canonicalized_resource(request, virtual_bucket)
    )
}

/// Compute the SigV2 signature: Base64(HMAC-SHA1(secret, string_to_sign)).
pub fn sign(secret_access_key: &str, string_to_sign: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_access_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// All `x-amz-*` headers, lowercased and sorted, one `name:value` per line.
fn canonicalized_amz_headers(request: &SignedRequest<'_>) -> String {
    let mut amz: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers {
        let name = name.as_str();
        if name.starts_with("x-amz-") {
            let value = value.to_str().unwrap_or("").trim();
            amz.entry(name).or_default().push(value.to_string());
        }
    }

    let mut result = String::new();
    for (name, values) in &amz {
        result.push_str(name);
        result.push(':');
        result.push_str(&values.join(","));
        result.push('\n');
    }
    result
}

/// The (bucket-prefixed) path plus signed sub-resources, sorted.
fn canonicalized_resource(request: &SignedRequest<'_>, virtual_bucket: Option<&str>) -> String {
    let mut resource = String::new();
    if let Some(bucket) = virtual_bucket {
        resource.push('/');
        resource.push_str(bucket);
    }
    resource.push_str(if request.path.is_empty() { "/" } else { request.path });

    let mut sub: Vec<(&str, Option<String>)> = request
        .query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|param| {
            let (key, value) = match param.split_once('=') {
                Some((k, v)) => (k, Some(super::sigv4::percent_decode(v)).filter(|v| !v.is_empty())),
                None => (param, None),
            };
            SUB_RESOURCES.contains(&key).then_some((key, value))
        })
        .collect();
    sub.sort_by(|a, b| a.0.cmp(b.0));

    if !sub.is_empty() {
        let params: Vec<String> = sub
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{}={}", k, v),
                None => k.to_string(),
            })
            .collect();
        resource.push('?');
        resource.push_str(&params.join("&"));
    }
    resource
}
