//! Multipart upload handlers: initiate, upload part (plain and copy),
//! complete, abort, and list parts.

use super::{
    check_canned_acl, ensure_bucket, extract_metadata, hval, read_blob_bytes,
    require_content_length, xml_response, AppState, Preconditions, S3Error, S3Request,
};
use crate::api::router::CopySource;
use crate::api::xml::{
    complete_multipart_result, initiate_multipart_result, CompleteMultipartUpload, CopyResult,
    ListPartsResult,
};
use crate::storage::PartRef;
use crate::types::ByteRange;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// POST /{bucket}/{key}?uploads
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn initiate(state: &AppState, req: &S3Request) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    check_canned_acl(&req.headers)?;

    let upload_id = state
        .multipart
        .initiate(
            Arc::clone(req.store()),
            bucket,
            key,
            req.auth.owner(),
            extract_metadata(&req.headers),
        )
        .await?;
    info!("CreateMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);

    Ok(xml_response(initiate_multipart_result(bucket, key, &upload_id)))
}

/// PUT /{bucket}/{key}?partNumber=N&uploadId=X
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn upload_part(
    state: &AppState,
    req: &S3Request,
    upload_id: &str,
    part_number: u32,
) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    require_content_length(&req.headers)?;
    info!(
        "UploadPart {}/{} part={} uploadId={} ({} bytes)",
        bucket,
        key,
        part_number,
        upload_id,
        req.body.len()
    );

    let etag = state
        .multipart
        .upload_part(
            upload_id,
            bucket,
            key,
            req.auth.owner(),
            part_number,
            req.body.clone(),
        )
        .await?;

    Ok((StatusCode::OK, [(header::ETAG, hval(&format!("\"{}\"", etag)))], "").into_response())
}

/// PUT /{bucket}/{key}?partNumber=N&uploadId=X with `x-amz-copy-source`
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn upload_part_copy(
    state: &AppState,
    req: &S3Request,
    upload_id: &str,
    part_number: u32,
    source: &CopySource,
) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    let range = match req.header("x-amz-copy-source-range") {
        None => None,
        Some(v) => match ByteRange::parse(v) {
            Some(r @ ByteRange::FromTo(..)) => Some(r),
            _ => {
                return Err(S3Error::InvalidArgument(
                    "The x-amz-copy-source-range value must be of the form bytes=first-last"
                        .to_string(),
                ))
            }
        },
    };
    info!(
        "UploadPartCopy {}/{} -> {}/{} part={} range={:?}",
        source.bucket, source.key, bucket, key, part_number, range
    );

    let (src, data) = read_blob_bytes(
        req.store(),
        &source.bucket,
        &source.key,
        range,
        state.limits.max_object_size,
    )
    .await?;
    Preconditions::read(&req.headers, "x-amz-copy-source-")
        .check(&src, S3Error::PreconditionFailed)?;

    let etag = state
        .multipart
        .upload_part(upload_id, bucket, key, req.auth.owner(), part_number, data)
        .await?;

    let result = CopyResult {
        etag,
        last_modified: Utc::now(),
    };
    Ok(xml_response(result.part_xml()))
}

/// POST /{bucket}/{key}?uploadId=X
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn complete(
    state: &AppState,
    req: &S3Request,
    upload_id: &str,
) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    let body_str = std::str::from_utf8(&req.body).map_err(|_| S3Error::MalformedXML)?;
    let request = CompleteMultipartUpload::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
        S3Error::MalformedXML
    })?;
    info!(
        "CompleteMultipartUpload {}/{} uploadId={} ({} parts)",
        bucket,
        key,
        upload_id,
        request.parts.len()
    );

    let parts: Vec<PartRef> = request
        .parts
        .into_iter()
        .map(|p| PartRef {
            part_number: p.part_number,
            etag: p.etag,
        })
        .collect();
    let desc = state
        .multipart
        .complete(upload_id, bucket, key, req.auth.owner(), &parts)
        .await?;
    debug!("Completed {}/{} etag={}", bucket, key, desc.etag);

    let location = match req.header("host") {
        Some(host) if req.route.virtual_host => format!("http://{}/{}", host, key),
        Some(host) => format!("http://{}/{}/{}", host, bucket, key),
        None => format!("/{}/{}", bucket, key),
    };
    Ok(xml_response(complete_multipart_result(
        &location, bucket, key, &desc.etag,
    )))
}

/// DELETE /{bucket}/{key}?uploadId=X
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn abort(state: &AppState, req: &S3Request, upload_id: &str) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    info!("AbortMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);

    state
        .multipart
        .abort(upload_id, bucket, key, req.auth.owner())
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /{bucket}/{key}?uploadId=X
#[instrument(skip_all, fields(bucket = ?req.route.bucket, key = ?req.route.key))]
pub async fn list_parts(
    state: &AppState,
    req: &S3Request,
    upload_id: &str,
    part_number_marker: u32,
    max_parts: usize,
) -> Result<Response, S3Error> {
    let (bucket, key) = (req.route.bucket()?, req.route.key()?);
    info!("ListParts {}/{} uploadId={}", bucket, key, upload_id);
    ensure_bucket(req.store(), bucket).await?;

    let listing = state.multipart.list_parts(
        upload_id,
        bucket,
        key,
        req.auth.owner(),
        part_number_marker,
        max_parts,
    )?;

    let result = ListPartsResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number_marker,
        next_part_number_marker: listing.next_part_number_marker,
        max_parts,
        is_truncated: listing.is_truncated,
        parts: listing.parts,
    };
    Ok(xml_response(result.to_xml()))
}
