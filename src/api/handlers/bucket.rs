//! Bucket-level S3 handlers: CRUD, listing, and multipart upload listing.

use super::{check_canned_acl, ensure_bucket, hval, xml_response, AppState, S3Error, S3Request};
use crate::api::router::{encode_continuation_token, ListParams, ListVersion};
use crate::api::xml::{
    location_constraint, ListBucketResult, ListBucketsResult, ListMultipartUploadsResult,
    ListPaging,
};
use crate::storage::ListRequest;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, instrument};

/// GET /
#[instrument(skip_all)]
pub async fn list_buckets(req: &S3Request) -> Result<Response, S3Error> {
    info!("LIST buckets");
    let mut buckets = req.store().list_containers().await?;
    buckets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(xml_response(ListBucketsResult { buckets }.to_xml()))
}

/// PUT /{bucket}
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn create_bucket(req: &S3Request) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    check_canned_acl(&req.headers)?;
    info!("CREATE bucket {}", bucket);

    if !req.store().create_container(bucket).await? {
        return Err(S3Error::BucketAlreadyOwnedByYou(bucket.to_string()));
    }

    Ok((
        StatusCode::OK,
        [(header::LOCATION, hval(&format!("/{}", bucket)))],
        "",
    )
        .into_response())
}

/// DELETE /{bucket}
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn delete_bucket(req: &S3Request) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    info!("DELETE bucket {}", bucket);
    req.store().delete_container(bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// HEAD /{bucket}
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn head_bucket(req: &S3Request) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    debug!("HEAD bucket {}", bucket);
    ensure_bucket(req.store(), bucket).await?;
    Ok(StatusCode::OK.into_response())
}

/// GET /{bucket}?location
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn get_bucket_location(req: &S3Request) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    ensure_bucket(req.store(), bucket).await?;
    Ok(xml_response(location_constraint()))
}

/// GET /{bucket} (ListObjects and ListObjectsV2)
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn list_objects(req: &S3Request, params: &ListParams) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    info!(
        "LIST {} prefix={:?} delimiter={:?} max_keys={}",
        bucket, params.prefix, params.delimiter, params.max_keys
    );

    let request = ListRequest {
        prefix: params.prefix.clone(),
        delimiter: params.delimiter.clone(),
        marker: params.effective_marker()?,
        max_keys: params.max_keys,
    };
    let page = req.store().list_blobs(bucket, &request).await?;
    debug!(
        "Listed {} objects and {} prefixes (truncated={})",
        page.objects.len(),
        page.common_prefixes.len(),
        page.is_truncated
    );

    let next = page.next_marker.filter(|_| page.is_truncated);
    let paging = match params.version {
        ListVersion::V1 => ListPaging::V1 {
            marker: params.marker.clone(),
            next_marker: next,
        },
        ListVersion::V2 => ListPaging::V2 {
            continuation_token: params.continuation_token.clone(),
            next_continuation_token: next.as_deref().map(encode_continuation_token),
            start_after: params.start_after.clone(),
        },
    };

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix: params.prefix.clone(),
        delimiter: params.delimiter.clone(),
        max_keys: params.max_keys,
        is_truncated: page.is_truncated,
        contents: page.objects,
        common_prefixes: page.common_prefixes,
        paging,
        url_encode: params.url_encode,
        fetch_owner: params.fetch_owner,
    };
    Ok(xml_response(result.to_xml()))
}

/// GET /{bucket}?uploads
#[instrument(skip_all, fields(bucket = ?req.route.bucket))]
pub async fn list_multipart_uploads(
    state: &AppState,
    req: &S3Request,
    prefix: &str,
    key_marker: &str,
    upload_id_marker: &str,
    max_uploads: usize,
) -> Result<Response, S3Error> {
    let bucket = req.route.bucket()?;
    info!(
        "ListMultipartUploads {} prefix={:?} key_marker={:?}",
        bucket, prefix, key_marker
    );
    ensure_bucket(req.store(), bucket).await?;

    let mut uploads = state.multipart.list_uploads(
        bucket,
        prefix,
        req.auth.owner(),
        key_marker,
        upload_id_marker,
    );
    let is_truncated = uploads.len() > max_uploads;
    uploads.truncate(max_uploads);

    let result = ListMultipartUploadsResult {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
        key_marker: key_marker.to_string(),
        upload_id_marker: upload_id_marker.to_string(),
        max_uploads,
        is_truncated,
        uploads,
    };
    Ok(xml_response(result.to_xml()))
}
