//! S3 API request handlers
//!
//! Every request enters through [`handle_request`], which authenticates from
//! the headers, routes, reads the body, and hands the typed [`Operation`] to
//! [`dispatch`].
//! Handlers are split into submodules by domain:
//! - `object`: GET, HEAD, PUT, COPY, DELETE for individual objects
//! - `bucket`: Bucket CRUD and listing
//! - `multipart`: Multipart upload lifecycle

mod bucket;
mod multipart;
mod object;

use super::auth::{authenticate, AuthContext, SignedRequest};
use super::aws_chunked::{decode_aws_chunked, decoded_content_length, is_aws_chunked, ChunkedDecodeError};
use super::errors::S3Error;
use super::router::{parse_query, Operation, RequestRouter, Route};
use crate::identity::IdentityResolver;
use crate::multipart::MultipartTracker;
use crate::storage::{collect_body, BlobStore};
use crate::types::{
    etag_matches, format_http_date, parse_http_date, BlobDescriptor, ByteRange, ContentMetadata,
    PutCondition,
};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::sync::Arc;
use tracing::{debug, warn};

const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// Request-independent limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Largest object accepted or buffered
    pub max_object_size: u64,
    /// Largest object sliced in memory for a range read
    pub max_range_buffer: u64,
    pub clock_skew: chrono::Duration,
}

/// Application state shared across handlers
pub struct AppState {
    pub resolver: Arc<IdentityResolver>,
    pub multipart: Arc<MultipartTracker>,
    pub router: RequestRouter,
    pub limits: Limits,
}

/// An authenticated, routed request with its payload fully received.
pub struct S3Request {
    pub route: Route,
    pub auth: AuthContext,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl S3Request {
    fn store(&self) -> &Arc<dyn BlobStore> {
        &self.auth.store
    }

    fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

/// Fallback handler for every S3 request.
pub async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let resource = request.uri().path().to_string();

    match process(&state, request).await {
        Ok(mut response) => {
            response
                .headers_mut()
                .insert("x-amz-request-id", hval(&request_id));
            response
        }
        Err(err) => {
            debug!("{} failed: {} ({})", resource, err.code(), err);
            err.into_response_with(&resource, &request_id)
        }
    }
}

async fn process(state: &AppState, request: Request) -> Result<Response, S3Error> {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let path = parts.uri.path();
    let raw_query = parts.uri.query().unwrap_or("");
    let headers = parts.headers;
    let query = parse_query(raw_query)?;

    // Nothing is buffered for a caller that has not proven who it is
    let virtual_bucket = state.router.virtual_bucket(&headers);
    let signed = SignedRequest::new(method.as_str(), path, raw_query, &headers);
    let auth = authenticate(
        &state.resolver,
        &signed,
        &query,
        virtual_bucket.as_deref(),
        state.limits.clock_skew,
        Utc::now(),
    )?;

    let route = state.router.route(&method, path, &query, &headers)?;
    let body = read_body(&headers, body, state.limits.max_object_size).await?;
    auth.verify_payload(&body)?;
    let body = decode_payload(&headers, body)?;
    verify_content_md5(&headers, &body)?;

    dispatch(
        state,
        S3Request {
            route,
            auth,
            headers,
            body,
        },
    )
    .await
}

/// Dispatch table: one handler per operation.
pub async fn dispatch(state: &AppState, req: S3Request) -> Result<Response, S3Error> {
    match &req.route.operation {
        Operation::ListBuckets => bucket::list_buckets(&req).await,
        Operation::CreateBucket => bucket::create_bucket(&req).await,
        Operation::DeleteBucket => bucket::delete_bucket(&req).await,
        Operation::HeadBucket => bucket::head_bucket(&req).await,
        Operation::GetBucketLocation => bucket::get_bucket_location(&req).await,
        Operation::ListObjects(params) => bucket::list_objects(&req, params).await,
        Operation::ListMultipartUploads {
            prefix,
            key_marker,
            upload_id_marker,
            max_uploads,
        } => {
            bucket::list_multipart_uploads(
                state,
                &req,
                prefix,
                key_marker,
                upload_id_marker,
                *max_uploads,
            )
            .await
        }
        Operation::DeleteObjects => object::delete_objects(&req).await,
        Operation::PutObject => object::put_object(state, &req).await,
        Operation::GetObject => object::get_object(state, &req).await,
        Operation::HeadObject => object::head_object(&req).await,
        Operation::DeleteObject => object::delete_object(&req).await,
        Operation::CopyObject { source } => object::copy_object(state, &req, source).await,
        Operation::InitiateMultipartUpload => multipart::initiate(state, &req).await,
        Operation::UploadPart {
            upload_id,
            part_number,
        } => multipart::upload_part(state, &req, upload_id, *part_number).await,
        Operation::UploadPartCopy {
            upload_id,
            part_number,
            source,
        } => multipart::upload_part_copy(state, &req, upload_id, *part_number, source).await,
        Operation::CompleteMultipartUpload { upload_id } => {
            multipart::complete(state, &req, upload_id).await
        }
        Operation::AbortMultipartUpload { upload_id } => {
            multipart::abort(state, &req, upload_id).await
        }
        Operation::ListParts {
            upload_id,
            part_number_marker,
            max_parts,
        } => multipart::list_parts(state, &req, upload_id, *part_number_marker, *max_parts).await,
    }
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Slack for aws-chunked framing on top of the payload limit.
fn framing_allowance(max_object_size: u64) -> u64 {
    max_object_size / 64 + 8192
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, "content-length").and_then(|v| v.trim().parse().ok())
}

/// Receive the whole request body, enforcing the object size limit.
async fn read_body(headers: &HeaderMap, body: Body, max_object_size: u64) -> Result<Bytes, S3Error> {
    let declared = content_length(headers);
    let payload = decoded_content_length(headers)
        .map(|n| n as u64)
        .or(declared);
    if let Some(size) = payload {
        if size > max_object_size {
            return Err(S3Error::EntityTooLarge {
                size,
                max: max_object_size,
            });
        }
    }

    let limit = max_object_size.saturating_add(framing_allowance(max_object_size));
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!("Failed to read request body: {}", e);
        S3Error::IncompleteBody
    })?;

    if let Some(expected) = declared {
        if bytes.len() as u64 != expected {
            return Err(S3Error::IncompleteBody);
        }
    }
    Ok(bytes)
}

/// Strip aws-chunked framing when present.
fn decode_payload(headers: &HeaderMap, body: Bytes) -> Result<Bytes, S3Error> {
    if body.is_empty() || !is_aws_chunked(headers) {
        return Ok(body);
    }
    decode_aws_chunked(&body, decoded_content_length(headers)).map_err(|e| {
        warn!("Rejected aws-chunked payload: {}", e);
        match e {
            ChunkedDecodeError::LengthMismatch { .. } | ChunkedDecodeError::Truncated { .. } => {
                S3Error::IncompleteBody
            }
            other => S3Error::InvalidRequest(format!("Malformed aws-chunked payload: {}", other)),
        }
    })
}

/// Check `Content-MD5` against the decoded payload.
fn verify_content_md5(headers: &HeaderMap, body: &[u8]) -> Result<(), S3Error> {
    use base64::Engine;
    let Some(value) = header_str(headers, "content-md5") else {
        return Ok(());
    };
    let expected = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .ok()
        .filter(|digest| digest.len() == 16)
        .ok_or(S3Error::InvalidDigest)?;
    if Md5::digest(body).as_slice() != expected.as_slice() {
        return Err(S3Error::BadDigest);
    }
    Ok(())
}

/// PUT-style operations must declare their length.
fn require_content_length(headers: &HeaderMap) -> Result<(), S3Error> {
    if headers.contains_key(header::CONTENT_LENGTH)
        || headers.contains_key("x-amz-decoded-content-length")
    {
        Ok(())
    } else {
        Err(S3Error::MissingContentLength)
    }
}

// ---------------------------------------------------------------------------
// Shared utility functions used across handler submodules
// ---------------------------------------------------------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Build an XML response with correct Content-Type header.
fn xml_response(xml: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml.into(),
    )
        .into_response()
}

/// Response headers for an object, verbatim from its descriptor.
fn build_object_headers(desc: &BlobDescriptor) -> HeaderMap {
    let meta = &desc.metadata;
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, hval(&desc.quoted_etag()));
    headers.insert(header::CONTENT_LENGTH, hval(&desc.content_length.to_string()));
    headers.insert(
        header::CONTENT_TYPE,
        hval(meta.content_type.as_deref().unwrap_or("application/octet-stream")),
    );
    headers.insert(
        header::LAST_MODIFIED,
        hval(&format_http_date(&desc.last_modified)),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(ref v) = meta.content_encoding {
        headers.insert(header::CONTENT_ENCODING, hval(v));
    }
    if let Some(ref v) = meta.content_disposition {
        headers.insert(header::CONTENT_DISPOSITION, hval(v));
    }
    if let Some(ref v) = meta.content_language {
        headers.insert(header::CONTENT_LANGUAGE, hval(v));
    }
    if let Some(ref v) = meta.expires {
        headers.insert(header::EXPIRES, hval(&format_http_date(v)));
    }

    // User-provided custom metadata (x-amz-meta-*)
    for (key, value) in &meta.user_metadata {
        let header_name = format!("{}{}", AMZ_META_PREFIX, key);
        if let Ok(name) = HeaderName::from_bytes(header_name.as_bytes()) {
            headers.insert(name, hval(value));
        }
    }

    headers
}

/// Content metadata supplied on a write request.
fn extract_metadata(headers: &HeaderMap) -> ContentMetadata {
    let text = |name: &str| header_str(headers, name).map(str::to_string);

    // aws-chunked is transport framing, not a stored encoding
    let content_encoding = header_str(headers, "content-encoding")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty() && !e.eq_ignore_ascii_case("aws-chunked"))
                .collect::<Vec<_>>()
                .join(",")
        })
        .filter(|v| !v.is_empty());

    let user_metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(AMZ_META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_string(), value.to_string()))
        })
        .collect();

    ContentMetadata {
        content_type: text("content-type"),
        content_encoding,
        content_disposition: text("content-disposition"),
        content_language: text("content-language"),
        expires: header_str(headers, "expires").and_then(parse_http_date),
        user_metadata,
    }
}

/// Accept only the canned ACLs that need no enforcement.
fn check_canned_acl(headers: &HeaderMap) -> Result<(), S3Error> {
    match header_str(headers, "x-amz-acl") {
        None | Some("private") | Some("public-read") => Ok(()),
        Some(other) => Err(S3Error::NotImplemented(format!(
            "Canned ACL {} is not supported",
            other
        ))),
    }
}

fn put_condition(headers: &HeaderMap) -> PutCondition {
    PutCondition {
        if_match: header_str(headers, "if-match").map(str::to_string),
        if_none_match: header_str(headers, "if-none-match").map(str::to_string),
    }
}

/// `If-*` request headers, plain or `x-amz-copy-source-` prefixed.
#[derive(Debug, Default)]
struct Preconditions<'a> {
    if_match: Option<&'a str>,
    if_none_match: Option<&'a str>,
    if_modified_since: Option<DateTime<Utc>>,
    if_unmodified_since: Option<DateTime<Utc>>,
}

impl<'a> Preconditions<'a> {
    fn read(headers: &'a HeaderMap, prefix: &str) -> Self {
        let get = |name: &str| header_str(headers, &format!("{}{}", prefix, name));
        Self {
            if_match: get("if-match"),
            if_none_match: get("if-none-match"),
            if_modified_since: get("if-modified-since").and_then(parse_http_date),
            if_unmodified_since: get("if-unmodified-since").and_then(parse_http_date),
        }
    }

    /// Evaluate against the current object. A failed match is always
    /// `PreconditionFailed`; an unchanged object yields `unchanged`.
    fn check(&self, desc: &BlobDescriptor, unchanged: S3Error) -> Result<(), S3Error> {
        let modified = desc.last_modified.timestamp();

        match self.if_match {
            Some(expected) if !etag_matches(expected, &desc.etag) => {
                return Err(S3Error::PreconditionFailed)
            }
            Some(_) => {}
            None => {
                if let Some(since) = self.if_unmodified_since {
                    if modified > since.timestamp() {
                        return Err(S3Error::PreconditionFailed);
                    }
                }
            }
        }

        match self.if_none_match {
            Some(rejected) if etag_matches(rejected, &desc.etag) => Err(unchanged),
            Some(_) => Ok(()),
            None => match self.if_modified_since {
                Some(since) if since <= Utc::now() && modified <= since.timestamp() => {
                    Err(unchanged)
                }
                _ => Ok(()),
            },
        }
    }
}

/// Fail with NoSuchBucket unless the bucket exists.
async fn ensure_bucket(store: &Arc<dyn BlobStore>, bucket: &str) -> Result<(), S3Error> {
    if store.container_exists(bucket).await? {
        Ok(())
    } else {
        Err(S3Error::NoSuchBucket(bucket.to_string()))
    }
}

/// Read a blob, or a byte range of it, into memory. Stores without ranged
/// reads are read whole and sliced.
async fn read_blob_bytes(
    store: &Arc<dyn BlobStore>,
    container: &str,
    key: &str,
    range: Option<ByteRange>,
    max: u64,
) -> Result<(BlobDescriptor, Bytes), S3Error> {
    let native = store.capabilities().ranged_reads;
    let data = store
        .get_blob(container, key, range.filter(|_| native))
        .await?;
    let len = data.descriptor.content_length;

    match (range, data.range) {
        (Some(r), None) => {
            let (first, last) = r.resolve(len).ok_or(S3Error::InvalidRange)?;
            let full = collect_body(data.body, max).await?;
            let part = slice_range(&full, first, last)?;
            Ok((data.descriptor, part))
        }
        _ => {
            let bytes = collect_body(data.body, max).await?;
            Ok((data.descriptor, bytes))
        }
    }
}

/// Bytes `first..=last` of a body read whole. The body can be shorter than
/// its descriptor claimed if the blob was replaced in between.
fn slice_range(full: &Bytes, first: u64, last: u64) -> Result<Bytes, S3Error> {
    let (first, last) = (
        usize::try_from(first).map_err(|_| S3Error::InvalidRange)?,
        usize::try_from(last).map_err(|_| S3Error::InvalidRange)?,
    );
    if first > last || last >= full.len() {
        return Err(S3Error::InternalError(format!(
            "range {}-{} outside a {} byte body",
            first,
            last,
            full.len()
        )));
    }
    Ok(full.slice(first..=last))
}
