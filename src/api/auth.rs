//! Request authentication
//!
//! Picks the signature scheme a request uses (V4 or V2 header, V4 or V2
//! presigned query, or none), resolves the presented access key to a tenant,
//! and runs the matching verifier. A request leaves here either fully
//! authenticated with its store bound, or anonymous with explicit permission.

use super::{sigv2, sigv4, S3Error};
use crate::identity::{IdentityResolver, Resolved};
use crate::storage::BlobStore;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Borrowed view of the request parts that take part in signing.
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Raw (still percent-encoded) path
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: &'a str,
    pub headers: &'a HeaderMap,
}

impl<'a> SignedRequest<'a> {
    pub fn new(method: &'a str, path: &'a str, query: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            path,
            query,
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&'a str> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then_some(v)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    V2,
    V4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated {
        access_key: String,
        version: SignatureVersion,
        /// The canonical string the client signed
        string_to_sign: String,
    },
}

/// Outcome of authentication: who is calling and which store serves them.
#[derive(Clone)]
pub struct AuthContext {
    pub identity: Identity,
    pub store: Arc<dyn BlobStore>,
    /// Signed `x-amz-content-sha256`, checked once the body has arrived
    pub payload_sha256: Option<String>,
}

impl AuthContext {
    fn anonymous(store: Arc<dyn BlobStore>) -> Self {
        Self {
            identity: Identity::Anonymous,
            store,
            payload_sha256: None,
        }
    }

    /// Check the received payload against the digest the client signed.
    pub fn verify_payload(&self, body: &[u8]) -> Result<(), S3Error> {
        sigv4::verify_payload_hash(self.payload_sha256.as_deref(), body)
    }

    /// Access key used to scope multipart sessions; `None` when anonymous.
    pub fn owner(&self) -> Option<&str> {
        match &self.identity {
            Identity::Anonymous => None,
            Identity::Authenticated { access_key, .. } => Some(access_key),
        }
    }
}

enum Presented {
    V4(sigv4::V4Credentials),
    V2(sigv2::V2Credentials),
}

impl Presented {
    fn access_key(&self) -> &str {
        match self {
            Presented::V4(c) => &c.access_key,
            Presented::V2(c) => &c.access_key,
        }
    }
}

/// Extract whatever signature material the request carries.
fn presented(
    request: &SignedRequest<'_>,
    query: &[(String, String)],
) -> Result<Option<Presented>, S3Error> {
    if let Some(header) = request.header("authorization") {
        if header.starts_with(sigv4::ALGORITHM) {
            return sigv4::parse_authorization(header).map(|c| Some(Presented::V4(c)));
        }
        if sigv2::is_v2_header(header) {
            return sigv2::parse_authorization(header).map(|c| Some(Presented::V2(c)));
        }
        return Err(S3Error::InvalidArgument(
            "Unsupported Authorization Type".to_string(),
        ));
    }
    if sigv4::is_presigned(query) {
        return sigv4::parse_presigned(query).map(|c| Some(Presented::V4(c)));
    }
    if sigv2::is_presigned(query) {
        return sigv2::parse_presigned(query).map(|c| Some(Presented::V2(c)));
    }
    Ok(None)
}

/// Authenticate a request from its method, target and headers alone, and
/// bind its backing store. The body is not needed: a signed payload digest
/// is carried in the returned context for [`AuthContext::verify_payload`].
///
/// `virtual_bucket` is the bucket derived from the Host header, if any.
pub fn authenticate(
    resolver: &IdentityResolver,
    request: &SignedRequest<'_>,
    query: &[(String, String)],
    virtual_bucket: Option<&str>,
    clock_skew: Duration,
    now: DateTime<Utc>,
) -> Result<AuthContext, S3Error> {
    // No credentials configured: signatures are not checked at all
    if let Some(store) = resolver.open_store() {
        return Ok(AuthContext::anonymous(store));
    }

    let Some(presented) = presented(request, query)? else {
        return match resolver.resolve(None)? {
            Resolved::Anonymous { store } => Ok(AuthContext::anonymous(store)),
            Resolved::Authenticated { .. } => Err(S3Error::AccessDenied),
        };
    };

    let access_key = presented.access_key().to_string();
    let (secret, store) = match resolver.resolve(Some(&access_key)) {
        Ok(Resolved::Authenticated {
            secret_access_key,
            store,
        }) => (secret_access_key, store),
        Ok(Resolved::Anonymous { .. }) => return Err(S3Error::AccessDenied),
        Err(e) => {
            warn!("Rejected unknown access key {}", access_key);
            return Err(e);
        }
    };

    let mut payload_sha256 = None;
    let (version, string_to_sign) = match presented {
        Presented::V4(creds) => {
            let sts = sigv4::verify(request, &creds, &secret, now, clock_skew)?;
            if !creds.is_presigned() {
                payload_sha256 = request.header("x-amz-content-sha256").map(str::to_string);
            }
            (SignatureVersion::V4, sts)
        }
        Presented::V2(creds) => {
            let sts = sigv2::verify(request, &creds, &secret, virtual_bucket, now, clock_skew)?;
            (SignatureVersion::V2, sts)
        }
    };

    debug!("Authenticated {} with {:?}", access_key, version);
    Ok(AuthContext {
        identity: Identity::Authenticated {
            access_key,
            version,
            string_to_sign,
        },
        store,
        payload_sha256,
    })
}
