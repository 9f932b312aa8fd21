//! Object-level S3 handlers: GET, HEAD, PUT, COPY, DELETE.

use super::{
    build_object_headers, check_canned_acl, ensure_bucket, extract_metadata, header_str, hval, put_condition,
    read_blob_bytes, require_content_length, slice_range, xml_response, AppState, Preconditions,
    S3Error, S3Request,
};
use crate::api::router::CopySource;
use crate::api::xml::{CopyResult, DeleteError, DeleteRequest, DeleteResult};
use crate::storage::{collect_body, StorageError};
use crate::types::{ByteRange, MetadataDirective, PutCondition};
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, instrument, warn};

/// Most keys a single DeleteObjects request may name.
const MAX_DELETE_KEYS: usize = 1000;

/// PUT /{bucket}/{key}
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn put_object(state: &AppState, req: &S3Request) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    require_content_length(&req.headers)?;
    check_canned_acl(&req.headers)?;

    let size = req.body.len() as u64;
    if size > state.limits.max_object_size {
        return Err(S3Error::EntityTooLarge {
            size,
            max: state.limits.max_object_size,
        });
    }
    info!("PUT {}/{} ({} bytes)", bucket, key, size);

    let store = req.store();
    let metadata = extract_metadata(&req.headers);
    let mut condition = put_condition(&req.headers);

    if !condition.is_empty() && !store.capabilities().conditional_put {
        // Read-before-write: another writer may slip in between
        let existing = match store.head_blob(bucket, key).await {
            Ok(desc) => Some(desc.etag),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if !condition.allows(existing.as_deref()) {
            debug!("Conditional PUT rejected for {}/{}", bucket, key);
            return Err(S3Error::PreconditionFailed);
        }
        condition = PutCondition::default();
    }

    let desc = store
        .put_blob(bucket, key, req.body.clone(), &metadata, &condition)
        .await?;
    debug!("Stored {}/{} etag={}", bucket, key, desc.etag);

    Ok((StatusCode::OK, [(header::ETAG, hval(&desc.quoted_etag()))], "").into_response())
}

/// GET /{bucket}/{key}
///
/// Stores with ranged reads stream the requested slice; others are read
/// whole and sliced in memory up to `max_range_buffer`.
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn get_object(state: &AppState, req: &S3Request) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    let store = req.store();
    // Unparseable ranges are ignored, as S3 does
    let range = req.header("range").and_then(ByteRange::parse);
    info!("GET {}/{} range={:?}", bucket, key, range);

    let native = store.capabilities().ranged_reads;
    let data = store
        .get_blob(bucket, key, range.filter(|_| native))
        .await?;
    Preconditions::read(&req.headers, "").check(&data.descriptor, S3Error::NotModified)?;

    let mut headers = build_object_headers(&data.descriptor);
    let total = data.descriptor.content_length;

    let Some(range) = range else {
        return Ok((StatusCode::OK, headers, Body::from_stream(data.body)).into_response());
    };

    let (first, last) = match data.range {
        Some(served) => served,
        None => range.resolve(total).ok_or(S3Error::InvalidRange)?,
    };
    headers.insert(
        header::CONTENT_RANGE,
        hval(&format!("bytes {}-{}/{}", first, last, total)),
    );
    headers.insert(header::CONTENT_LENGTH, hval(&(last - first + 1).to_string()));

    let body = if data.range.is_some() {
        Body::from_stream(data.body)
    } else {
        if total > state.limits.max_range_buffer {
            return Err(S3Error::NotImplemented(format!(
                "Range reads on objects over {} bytes are not supported by this store",
                state.limits.max_range_buffer
            )));
        }
        let full = collect_body(data.body, state.limits.max_range_buffer).await?;
        Body::from(slice_range(&full, first, last)?)
    };
    debug!("Serving {}/{} bytes {}-{}/{}", bucket, key, first, last, total);

    Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
}

/// HEAD /{bucket}/{key}
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn head_object(req: &S3Request) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    info!("HEAD {}/{}", bucket, key);

    let desc = req.store().head_blob(bucket, key).await?;
    Preconditions::read(&req.headers, "").check(&desc, S3Error::NotModified)?;

    Ok((StatusCode::OK, build_object_headers(&desc)).into_response())
}

/// PUT /{bucket}/{key} with `x-amz-copy-source`
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn copy_object(
    state: &AppState,
    req: &S3Request,
    source: &CopySource,
) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    check_canned_acl(&req.headers)?;

    let directive = match header_str(&req.headers, "x-amz-metadata-directive") {
        None => MetadataDirective::Copy,
        Some(v) if v.eq_ignore_ascii_case("COPY") => MetadataDirective::Copy,
        Some(v) if v.eq_ignore_ascii_case("REPLACE") => {
            MetadataDirective::Replace(extract_metadata(&req.headers))
        }
        Some(other) => {
            return Err(S3Error::InvalidArgument(format!(
                "Unknown metadata directive: {}",
                other
            )))
        }
    };
    if source.bucket == bucket && source.key == key && matches!(directive, MetadataDirective::Copy) {
        return Err(S3Error::InvalidRequest(
            "This copy request is illegal because it is trying to copy an object to itself \
             without changing the object's metadata, storage class, website redirect location \
             or encryption attributes."
                .to_string(),
        ));
    }

    info!(
        "COPY {}/{} -> {}/{}",
        source.bucket, source.key, bucket, key
    );

    let store = req.store();
    let src = store.head_blob(&source.bucket, &source.key).await?;
    Preconditions::read(&req.headers, "x-amz-copy-source-")
        .check(&src, S3Error::PreconditionFailed)?;
    ensure_bucket(store, bucket).await?;

    let desc = if store.capabilities().native_copy {
        store
            .copy_blob(&source.bucket, &source.key, bucket, key, &directive)
            .await?
    } else {
        let (src, data) = read_blob_bytes(
            store,
            &source.bucket,
            &source.key,
            None,
            state.limits.max_object_size,
        )
        .await?;
        let metadata = match directive {
            MetadataDirective::Copy => src.metadata,
            MetadataDirective::Replace(m) => m,
        };
        store
            .put_blob(bucket, key, data, &metadata, &PutCondition::default())
            .await?
    };
    debug!("Copied to {}/{} etag={}", bucket, key, desc.etag);

    let result = CopyResult {
        etag: desc.etag,
        last_modified: desc.last_modified,
    };
    Ok(xml_response(result.object_xml()))
}

/// DELETE /{bucket}/{key}
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn delete_object(req: &S3Request) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    info!("DELETE {}/{}", bucket, key);

    match req.store().delete_blob(bucket, key).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    // S3 returns 204 No Content on successful delete
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /{bucket}?delete
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn delete_objects(req: &S3Request) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    let body_str = std::str::from_utf8(&req.body).map_err(|_| S3Error::MalformedXML)?;
    let delete_req = DeleteRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse DeleteObjects XML: {}", e);
        S3Error::MalformedXML
    })?;
    if delete_req.objects.len() > MAX_DELETE_KEYS {
        return Err(S3Error::MalformedXML);
    }

    info!(
        "DELETE multiple objects in {} ({} objects)",
        bucket,
        delete_req.objects.len()
    );

    let store = req.store();
    ensure_bucket(store, bucket).await?;

    let mut result = DeleteResult::default();
    for obj in delete_req.objects {
        match store.delete_blob(bucket, &obj.key).await {
            // Missing keys count as deleted
            Ok(()) | Err(StorageError::NotFound(_)) => result.deleted.push(obj.key),
            Err(e) => {
                warn!("Failed to delete {}/{}: {}", bucket, obj.key, e);
                let err = S3Error::from(e);
                result.errors.push(DeleteError {
                    key: obj.key,
                    code: err.code(),
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(xml_response(
        result.to_xml(delete_req.quiet.unwrap_or(false)),
    ))
}
