//! AWS chunked payload decoding
//!
//! Streaming uploads (`x-amz-content-sha256: STREAMING-*`) frame the body as:
//!
//! ```text
//! <hex-chunk-size>[;chunk-signature=<signature>]\r\n
//! <chunk-data>\r\n
//! ...
//! 0[;chunk-signature=<signature>]\r\n
//! [<trailer-name>:<value>\r\n ...]
//! \r\n
//! ```
//!
//! Only the framing is removed here; per-chunk signatures are not checked.

use axum::body::Bytes;
use axum::http::HeaderMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkedDecodeError {
    #[error("chunk header is not terminated")]
    UnterminatedHeader,

    #[error("invalid chunk size: {0}")]
    InvalidSize(String),

    #[error("chunk of {need} bytes truncated at {have}")]
    Truncated { need: usize, have: usize },

    #[error("chunk data is not followed by CRLF")]
    MissingDelimiter,

    #[error("decoded length {actual} does not match declared {declared}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Whether the body uses AWS chunked framing.
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    let streaming = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("STREAMING-"))
        .unwrap_or(false);
    let encoded = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|e| e.trim().eq_ignore_ascii_case("aws-chunked")))
        .unwrap_or(false);
    streaming || encoded
}

/// Payload length declared by `x-amz-decoded-content-length`.
pub fn decoded_content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Strip chunk framing and return the payload.
pub fn decode_aws_chunked(
    body: &Bytes,
    expected_length: Option<usize>,
) -> Result<Bytes, ChunkedDecodeError> {
    let mut result = Vec::with_capacity(expected_length.unwrap_or(body.len()));
    let mut pos = 0;

    loop {
        let header_end = find_crlf(&body[pos..]).ok_or(ChunkedDecodeError::UnterminatedHeader)?;
        let header_line = String::from_utf8_lossy(&body[pos..pos + header_end]);
        pos += header_end + 2;

        // "<hex-size>;chunk-signature=..." or a bare size
        let size_hex = header_line.split(';').next().unwrap_or("").trim();
        let chunk_size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ChunkedDecodeError::InvalidSize(size_hex.to_string()))?;

        if chunk_size == 0 {
            // Trailers (checksums) follow the final chunk; nothing to keep
            break;
        }

        let have = body.len() - pos;
        if chunk_size > have {
            return Err(ChunkedDecodeError::Truncated {
                need: chunk_size,
                have,
            });
        }
        result.extend_from_slice(&body[pos..pos + chunk_size]);
        pos += chunk_size;

        if body.get(pos..pos + 2) != Some(b"\r\n".as_slice()) {
            return Err(ChunkedDecodeError::MissingDelimiter);
        }
        pos += 2;
    }

    if let Some(declared) = expected_length {
        if result.len() != declared {
            return Err(ChunkedDecodeError::LengthMismatch {
                declared,
                actual: result.len(),
            });
        }
    }

    debug!(
        "AWS chunked: decoded {} bytes from {} byte payload",
        result.len(),
        body.len()
    );
    Ok(Bytes::from(result))
}

/// Find the position of \r\n in a byte slice
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
