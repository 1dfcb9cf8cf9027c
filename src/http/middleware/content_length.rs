//! `Content-Length` computation.

use crate::http::error::MessageError;
use crate::http::response::{is_no_body_status, Response};

/// Set `Content-Length` from the known body size.
///
/// `Transfer-Encoding` wins over a fixed length, and an explicit
/// `Content-Length` is never recomputed.
pub fn content_length(response: Response) -> Result<Response, MessageError> {
    if response.has_header("Transfer-Encoding") {
        return Ok(response.without_header("Content-Length"));
    }

    if response.has_header("Content-Length") || is_no_body_status(response.status()) {
        return Ok(response);
    }

    let body = response.body();
    if !body.is_readable() {
        return Ok(response);
    }

    match body.size() {
        None | Some(0) => Ok(response),
        Some(size) => response.with_header("Content-Length", [size.to_string()]),
    }
}
