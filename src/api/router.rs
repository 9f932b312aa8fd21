//! S3 request routing
//!
//! Maps method + path + query + headers to a typed [`Operation`]. The bucket
//! is the first path segment, or the leftmost Host label when virtual-host
//! addressing is configured and the Host header ends with the configured
//! suffix. Disambiguation order: `uploadId`, then `uploads`, then the HTTP
//! method and whether a key is present.

use super::S3Error;
use crate::types::{validate_bucket_name, validate_key};
use axum::http::{HeaderMap, Method};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Largest page S3 returns for listings.
pub const MAX_LIST_KEYS: usize = 1000;

/// Sub-resources this gateway does not translate.
const UNSUPPORTED_SUBRESOURCES: &[&str] = &[
    "accelerate",
    "acl",
    "analytics",
    "attributes",
    "cors",
    "encryption",
    "intelligent-tiering",
    "inventory",
    "legal-hold",
    "lifecycle",
    "logging",
    "metrics",
    "notification",
    "object-lock",
    "ownershipControls",
    "policy",
    "policyStatus",
    "publicAccessBlock",
    "replication",
    "requestPayment",
    "restore",
    "retention",
    "select",
    "tagging",
    "torrent",
    "versioning",
    "versions",
    "website",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVersion {
    V1,
    V2,
}

/// ListObjects / ListObjectsV2 parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub version: ListVersion,
    pub prefix: String,
    pub delimiter: Option<String>,
    /// V1 `marker`
    pub marker: Option<String>,
    /// V2 `start-after`
    pub start_after: Option<String>,
    /// V2 `continuation-token`, as sent
    pub continuation_token: Option<String>,
    pub max_keys: usize,
    /// `encoding-type=url`
    pub url_encode: bool,
    pub fetch_owner: bool,
}

impl ListParams {
    /// Exclusive start key for the store.
    pub fn effective_marker(&self) -> Result<Option<String>, S3Error> {
        match self.version {
            ListVersion::V1 => Ok(self.marker.clone()),
            ListVersion::V2 => match self.continuation_token {
                Some(ref token) => decode_continuation_token(token).map(Some),
                None => Ok(self.start_after.clone()),
            },
        }
    }
}

/// Opaque V2 continuation token for a resume key.
pub fn encode_continuation_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

fn decode_continuation_token(token: &str) -> Result<String, S3Error> {
    URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| {
            S3Error::InvalidArgument("The continuation token provided is incorrect".to_string())
        })
}

/// Source of a CopyObject / UploadPartCopy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
}

impl CopySource {
    /// Parse `x-amz-copy-source` (`[/]bucket/key`, percent-encoded).
    pub fn parse(value: &str) -> Result<Self, S3Error> {
        let invalid =
            || S3Error::InvalidArgument("Copy Source must mention the source bucket and key: sourcebucket/sourcekey".to_string());
        let value = value.split_once("?versionId=").map_or(value, |(v, _)| v);
        let decoded = super::sigv4::percent_decode(value);
        let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);
        let (bucket, key) = trimmed.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// The S3 operation a request maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ListBuckets,
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    GetBucketLocation,
    ListObjects(ListParams),
    ListMultipartUploads {
        prefix: String,
        /// Resume after this key (and `upload_id_marker` within it)
        key_marker: String,
        upload_id_marker: String,
        max_uploads: usize,
    },
    DeleteObjects,
    PutObject,
    GetObject,
    HeadObject,
    DeleteObject,
    CopyObject {
        source: CopySource,
    },
    InitiateMultipartUpload,
    UploadPart {
        upload_id: String,
        part_number: u32,
    },
    UploadPartCopy {
        upload_id: String,
        part_number: u32,
        source: CopySource,
    },
    CompleteMultipartUpload {
        upload_id: String,
    },
    AbortMultipartUpload {
        upload_id: String,
    },
    ListParts {
        upload_id: String,
        part_number_marker: u32,
        max_parts: usize,
    },
}

impl Operation {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListBuckets => "ListBuckets",
            Operation::CreateBucket => "CreateBucket",
            Operation::DeleteBucket => "DeleteBucket",
            Operation::HeadBucket => "HeadBucket",
            Operation::GetBucketLocation => "GetBucketLocation",
            Operation::ListObjects(p) if p.version == ListVersion::V2 => "ListObjectsV2",
            Operation::ListObjects(_) => "ListObjects",
            Operation::ListMultipartUploads { .. } => "ListMultipartUploads",
            Operation::DeleteObjects => "DeleteObjects",
            Operation::PutObject => "PutObject",
            Operation::GetObject => "GetObject",
            Operation::HeadObject => "HeadObject",
            Operation::DeleteObject => "DeleteObject",
            Operation::CopyObject { .. } => "CopyObject",
            Operation::InitiateMultipartUpload => "CreateMultipartUpload",
            Operation::UploadPart { .. } => "UploadPart",
            Operation::UploadPartCopy { .. } => "UploadPartCopy",
            Operation::CompleteMultipartUpload { .. } => "CompleteMultipartUpload",
            Operation::AbortMultipartUpload { .. } => "AbortMultipartUpload",
            Operation::ListParts { .. } => "ListParts",
        }
    }
}

/// A routed request: target plus operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub operation: Operation,
    /// Bucket taken from the Host header rather than the path
    pub virtual_host: bool,
}

impl Route {
    /// Bucket of a bucket- or object-level operation.
    pub fn bucket(&self) -> Result<&str, S3Error> {
        self.bucket
            .as_deref()
            .ok_or_else(|| S3Error::InvalidRequest("A bucket name is required".to_string()))
    }

    pub fn key(&self) -> Result<&str, S3Error> {
        self.key
            .as_deref()
            .ok_or_else(|| S3Error::InvalidRequest("An object key is required".to_string()))
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestRouter {
    /// Domain suffix for virtual-host addressing (e.g. `s3.localhost`)
    virtual_host: Option<String>,
}

impl RequestRouter {
    pub fn new(virtual_host: Option<String>) -> Self {
        Self {
            virtual_host: virtual_host
                .map(|v| v.trim_start_matches('.').to_ascii_lowercase())
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn route(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<Route, S3Error> {
        let virtual_bucket = self.virtual_bucket(headers);
        let virtual_host = virtual_bucket.is_some();
        let (bucket, key) = match virtual_bucket {
            Some(bucket) => {
                let raw_key = path.strip_prefix('/').unwrap_or(path);
                let key = (!raw_key.is_empty()).then(|| super::sigv4::percent_decode(raw_key));
                (Some(bucket), key)
            }
            None => parse_path(path)?,
        };

        if let Some(ref b) = bucket {
            validate_bucket_name(b).map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;
        }
        if let Some(ref k) = key {
            validate_key(k).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
        }
        if let Some((name, _)) = query
            .iter()
            .find(|(k, _)| UNSUPPORTED_SUBRESOURCES.contains(&k.as_str()))
        {
            return Err(S3Error::NotImplemented(format!(
                "The {} sub-resource is not implemented",
                name
            )));
        }

        let operation = identify(method, bucket.is_some(), key.is_some(), query, headers)?;
        Ok(Route {
            bucket,
            key,
            operation,
            virtual_host,
        })
    }

    /// Bucket from `<bucket>.<suffix>[:port]`, when configured.
    pub fn virtual_bucket(&self, headers: &HeaderMap) -> Option<String> {
        let suffix = self.virtual_host.as_deref()?;
        let host = headers.get("host").and_then(|v| v.to_str().ok())?;
        let host = host.rsplit_once(':').map_or(host, |(h, _)| h).to_ascii_lowercase();
        let bucket = host.strip_suffix(suffix)?.strip_suffix('.')?;
        (!bucket.is_empty()).then(|| bucket.to_string())
    }
}

/// Split a path-style URI path into bucket and key.
fn parse_path(path: &str) -> Result<(Option<String>, Option<String>), S3Error> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok((None, None));
    }
    let (bucket, key) = match trimmed.split_once('/') {
        Some((b, k)) => (b, (!k.is_empty()).then_some(k)),
        None => (trimmed, None),
    };
    if bucket.is_empty() {
        return Err(S3Error::InvalidRequest(
            "An object key requires a bucket name".to_string(),
        ));
    }
    Ok((
        Some(super::sigv4::percent_decode(bucket)),
        key.map(super::sigv4::percent_decode),
    ))
}

fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn has_param(query: &[(String, String)], name: &str) -> bool {
    query.iter().any(|(k, _)| k == name)
}

fn parse_number<T: std::str::FromStr>(
    query: &[(String, String)],
    name: &str,
    default: T,
) -> Result<T, S3Error> {
    match query_value(query, name) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| {
            S3Error::InvalidArgument(format!("Provided {} not an integer or within integer range", name))
        }),
    }
}

fn copy_source(headers: &HeaderMap) -> Result<Option<CopySource>, S3Error> {
    headers
        .get("x-amz-copy-source")
        .map(|v| {
            v.to_str()
                .map_err(|_| S3Error::InvalidArgument("Invalid x-amz-copy-source".to_string()))
                .and_then(CopySource::parse)
        })
        .transpose()
}

fn identify(
    method: &Method,
    has_bucket: bool,
    has_key: bool,
    query: &[(String, String)],
    headers: &HeaderMap,
) -> Result<Operation, S3Error> {
    if !has_bucket {
        return match *method {
            Method::GET => Ok(Operation::ListBuckets),
            _ => Err(S3Error::MethodNotAllowed),
        };
    }

    if let Some(upload_id) = query_value(query, "uploadId") {
        if !has_key {
            return Err(S3Error::InvalidRequest(
                "Multipart operations require an object key".to_string(),
            ));
        }
        let upload_id = upload_id.to_string();
        return match *method {
            Method::PUT => {
                let part_number = query_value(query, "partNumber")
                    .ok_or_else(|| S3Error::InvalidArgument("partNumber is required".to_string()))?
                    .parse()
                    .map_err(|_| {
                        S3Error::InvalidArgument(
                            "Part number must be an integer between 1 and 10000, inclusive"
                                .to_string(),
                        )
                    })?;
                match copy_source(headers)? {
                    Some(source) => Ok(Operation::UploadPartCopy {
                        upload_id,
                        part_number,
                        source,
                    }),
                    None => Ok(Operation::UploadPart {
                        upload_id,
                        part_number,
                    }),
                }
            }
            Method::POST => Ok(Operation::CompleteMultipartUpload { upload_id }),
            Method::DELETE => Ok(Operation::AbortMultipartUpload { upload_id }),
            Method::GET => Ok(Operation::ListParts {
                upload_id,
                part_number_marker: parse_number(query, "part-number-marker", 0)?,
                max_parts: parse_number(query, "max-parts", MAX_LIST_KEYS)?.min(MAX_LIST_KEYS),
            }),
            _ => Err(S3Error::MethodNotAllowed),
        };
    }

    if has_param(query, "uploads") {
        return match (method, has_key) {
            (&Method::POST, true) => Ok(Operation::InitiateMultipartUpload),
            (&Method::GET, false) => Ok(Operation::ListMultipartUploads {
                prefix: query_value(query, "prefix").unwrap_or("").to_string(),
                key_marker: query_value(query, "key-marker").unwrap_or("").to_string(),
                upload_id_marker: query_value(query, "upload-id-marker").unwrap_or("").to_string(),
                max_uploads: parse_number(query, "max-uploads", MAX_LIST_KEYS)?.min(MAX_LIST_KEYS),
            }),
            (&Method::POST, false) | (&Method::GET, true) => Err(S3Error::InvalidRequest(
                "The uploads sub-resource does not apply to this resource".to_string(),
            )),
            _ => Err(S3Error::MethodNotAllowed),
        };
    }

    if !has_key {
        return match *method {
            Method::GET if has_param(query, "location") => Ok(Operation::GetBucketLocation),
            Method::GET => Ok(Operation::ListObjects(list_params(query)?)),
            Method::PUT => Ok(Operation::CreateBucket),
            Method::DELETE => Ok(Operation::DeleteBucket),
            Method::HEAD => Ok(Operation::HeadBucket),
            Method::POST if has_param(query, "delete") => Ok(Operation::DeleteObjects),
            Method::POST => Err(S3Error::NotImplemented(
                "POST object uploads are not implemented".to_string(),
            )),
            _ => Err(S3Error::MethodNotAllowed),
        };
    }

    match *method {
        Method::GET => Ok(Operation::GetObject),
        Method::HEAD => Ok(Operation::HeadObject),
        Method::DELETE => Ok(Operation::DeleteObject),
        Method::PUT => match copy_source(headers)? {
            Some(source) => Ok(Operation::CopyObject { source }),
            None => Ok(Operation::PutObject),
        },
        _ => Err(S3Error::MethodNotAllowed),
    }
}

fn list_params(query: &[(String, String)]) -> Result<ListParams, S3Error> {
    let version = match query_value(query, "list-type") {
        None | Some("1") => ListVersion::V1,
        Some("2") => ListVersion::V2,
        Some(_) => {
            return Err(S3Error::InvalidArgument(
                "Invalid List Type specified".to_string(),
            ))
        }
    };
    let url_encode = match query_value(query, "encoding-type") {
        None => false,
        Some(v) if v.eq_ignore_ascii_case("url") => true,
        Some(_) => {
            return Err(S3Error::InvalidArgument(
                "Invalid Encoding Method specified in Request".to_string(),
            ))
        }
    };
    let max_keys: i64 = parse_number(query, "max-keys", MAX_LIST_KEYS as i64)?;
    if max_keys < 0 {
        return Err(S3Error::InvalidArgument(
            "max-keys cannot be negative".to_string(),
        ));
    }
    let owned = |name: &str| query_value(query, name).map(str::to_string);

    Ok(ListParams {
        version,
        prefix: owned("prefix").unwrap_or_default(),
        delimiter: owned("delimiter").filter(|d| !d.is_empty()),
        marker: owned("marker").filter(|m| !m.is_empty()),
        start_after: owned("start-after").filter(|m| !m.is_empty()),
        continuation_token: owned("continuation-token").filter(|m| !m.is_empty()),
        max_keys: (max_keys as usize).min(MAX_LIST_KEYS),
        url_encode,
        fetch_owner: query_value(query, "fetch-owner") == Some("true"),
    })
}

/// Parse a raw query string into decoded pairs.
pub fn parse_query(raw: &str) -> Result<Vec<(String, String)>, S3Error> {
    serde_urlencoded::from_str(raw)
        .map_err(|_| S3Error::InvalidArgument("Malformed query string".to_string()))
}
