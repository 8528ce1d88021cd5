//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept out of
//! services.rs so they can be unit tested on their own.

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};

use crate::api::error::ApiError;

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` with or without a charset parameter.
/// Rejects `application/jsonp`, `application/json-patch+json`, `text/json`
/// and malformed media types.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("invalid Content-Type: {}", content_type)))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidInput(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Collect a request body, failing once it grows past `max_size` bytes.
///
/// Runs after request decompression, so the limit applies to the
/// decoded payload.
pub async fn read_body(body: axum::body::Body, max_size: usize) -> Result<Bytes, ApiError> {
    let collected = Limited::new(body, max_size).collect().await.map_err(|err| {
        if err.is::<http_body_util::LengthLimitError>() {
            ApiError::PayloadTooLarge(max_size)
        } else {
            ApiError::InvalidInput(format!("failed to read body: {err}"))
        }
    })?;

    Ok(collected.to_bytes())
}
