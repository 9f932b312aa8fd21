//! S3 error types and XML responses

use super::xml::escape_xml;
use crate::storage::StorageError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

/// Coarse failure classes every S3 error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad, missing or expired credentials or signatures
    Authentication,
    /// Container, key or upload absent
    NotFound,
    /// State conflicts and part-size violations
    Conflict,
    /// Malformed request shape or parameters
    Validation,
    /// The bound store cannot perform the operation
    Capability,
    /// I/O or transient failure in the store
    Backend,
}

/// S3 API errors
///
/// `Display` yields the human-readable `<Message>`; the code string comes
/// from [`S3Error::code`].
#[derive(Debug, Error)]
pub enum S3Error {
    // Authentication
    #[error("Access Denied")]
    AccessDenied,

    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("The difference between the request time and the current time is too large.")]
    RequestTimeTooSkewed,

    #[error("Request has expired")]
    RequestExpired,

    #[error("Request is not valid yet")]
    RequestNotYetValid,

    #[error("The authorization header is malformed; {0}")]
    AuthorizationHeaderMalformed(String),

    #[error("The provided 'x-amz-content-sha256' header does not match what was computed.")]
    XAmzContentSHA256Mismatch,

    // Not found
    #[error("The specified bucket does not exist")]
    NoSuchBucket(String),

    #[error("The specified key does not exist.")]
    NoSuchKey(String),

    #[error("The specified multipart upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload(String),

    // Conflict
    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty(String),

    #[error("Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou(String),

    #[error("A conflicting conditional operation is currently in progress against this resource. Please try again.")]
    OperationAborted,

    #[error("Your proposed upload is smaller than the minimum allowed object size.")]
    EntityTooSmall,

    #[error("At least one of the pre-conditions you specified did not hold")]
    PreconditionFailed,

    // Validation
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("The specified bucket is not valid: {0}")]
    InvalidBucketName(String),

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("{0}")]
    InvalidPart(String),

    #[error("The list of parts was not in ascending order. The parts list must be specified in order by part number.")]
    InvalidPartOrder,

    #[error("The requested range is not satisfiable")]
    InvalidRange,

    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    #[error("The Content-MD5 you specified is not valid.")]
    InvalidDigest,

    #[error("You must provide the Content-Length HTTP header.")]
    MissingContentLength,

    #[error("You did not provide the number of bytes specified by the Content-Length HTTP header.")]
    IncompleteBody,

    #[error("Your proposed upload of {size} bytes exceeds the maximum allowed object size of {max} bytes.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("Not Modified")]
    NotModified,

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    // Capability
    #[error("{0}")]
    NotImplemented(String),

    // Backend
    #[error("We encountered an internal error. Please try again.")]
    InternalError(String),
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "AccessDenied",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::RequestExpired | S3Error::RequestNotYetValid => "AccessDenied",
            S3Error::AuthorizationHeaderMalformed(_) => "AuthorizationHeaderMalformed",
            S3Error::XAmzContentSHA256Mismatch => "XAmzContentSHA256Mismatch",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::BucketAlreadyOwnedByYou(_) => "BucketAlreadyOwnedByYou",
            S3Error::OperationAborted => "OperationAborted",
            S3Error::EntityTooSmall => "EntityTooSmall",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::BadDigest => "BadDigest",
            S3Error::InvalidDigest => "InvalidDigest",
            S3Error::MissingContentLength => "MissingContentLength",
            S3Error::IncompleteBody => "IncompleteBody",
            S3Error::EntityTooLarge { .. } => "EntityTooLarge",
            S3Error::NotModified => "NotModified",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::NotImplemented(_) => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::AuthorizationHeaderMalformed(_) | S3Error::XAmzContentSHA256Mismatch => {
                StatusCode::BAD_REQUEST
            }
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => {
                StatusCode::NOT_FOUND
            }
            S3Error::BucketNotEmpty(_)
            | S3Error::BucketAlreadyOwnedByYou(_)
            | S3Error::OperationAborted => StatusCode::CONFLICT,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            S3Error::NotModified => StatusCode::NOT_MODIFIED,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => match self.kind() {
                ErrorKind::Authentication => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            S3Error::AccessDenied
            | S3Error::SignatureDoesNotMatch
            | S3Error::InvalidAccessKeyId
            | S3Error::RequestTimeTooSkewed
            | S3Error::RequestExpired
            | S3Error::RequestNotYetValid
            | S3Error::AuthorizationHeaderMalformed(_)
            | S3Error::XAmzContentSHA256Mismatch => ErrorKind::Authentication,
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => {
                ErrorKind::NotFound
            }
            S3Error::BucketNotEmpty(_)
            | S3Error::BucketAlreadyOwnedByYou(_)
            | S3Error::OperationAborted
            | S3Error::EntityTooSmall
            | S3Error::PreconditionFailed => ErrorKind::Conflict,
            S3Error::NotImplemented(_) => ErrorKind::Capability,
            S3Error::InternalError(_) => ErrorKind::Backend,
            _ => ErrorKind::Validation,
        }
    }

    /// Build the error document for a failed request.
    pub fn to_document(&self, resource: &str, request_id: &str) -> ErrorDocument {
        ErrorDocument {
            code: self.code(),
            message: self.to_string(),
            resource: resource.to_string(),
            request_id: request_id.to_string(),
        }
    }

    /// Render the complete HTTP response, logging backend detail that the
    /// client never sees.
    pub fn into_response_with(self, resource: &str, request_id: &str) -> Response {
        if let S3Error::InternalError(ref detail) = self {
            warn!(request_id, "Internal error on {}: {}", resource, detail);
        }
        let status = self.status_code();
        let mut response = if status == StatusCode::NOT_MODIFIED {
            status.into_response()
        } else {
            let body = self.to_document(resource, request_id).to_xml();
            (status, [("Content-Type", "application/xml")], body).into_response()
        };
        if let Ok(v) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert("x-amz-request-id", v);
        }
        response
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.into_response_with("", &request_id)
    }
}

/// The S3 `<Error>` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: &'static str,
    pub message: String,
    pub resource: String,
    pub request_id: String,
}

impl ErrorDocument {
    /// Generate XML error response
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code,
            escape_xml(&self.message),
            escape_xml(&self.resource),
            escape_xml(&self.request_id)
        )
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ContainerNotFound(c) => S3Error::NoSuchBucket(c),
            StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            StorageError::ContainerNotEmpty(c) => S3Error::BucketNotEmpty(c),
            StorageError::PreconditionFailed(_) => S3Error::PreconditionFailed,
            StorageError::InvalidRange => S3Error::InvalidRange,
            StorageError::UploadNotFound(id) => S3Error::NoSuchUpload(id),
            StorageError::PartNotFound(n) => {
                S3Error::InvalidPart(format!("Part {} has not been uploaded", n))
            }
            StorageError::TooLarge { size, max } => S3Error::EntityTooLarge { size, max },
            StorageError::Unsupported(what) => S3Error::NotImplemented(format!(
                "The backing store does not support {}",
                what
            )),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}
