//! S3 API implementation

pub mod auth;
mod aws_chunked;
mod errors;
pub mod handlers;
pub mod router;
pub mod sigv2;
pub mod sigv4;
mod xml;

pub use auth::{AuthContext, Identity, SignatureVersion, SignedRequest};
pub use errors::{ErrorDocument, ErrorKind, S3Error};
pub use router::{Operation, RequestRouter, Route};
