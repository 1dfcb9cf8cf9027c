//! Empty body for statuses that forbid one.

use crate::http::response::{is_no_body_status, Response};
use crate::http::stream::StreamFactory;

/// Replace the body of 1xx/204/205/304 responses with an empty stream.
pub fn remove_body_by_status(response: Response, streams: &dyn StreamFactory) -> Response {
    if !is_no_body_status(response.status()) {
        return response;
    }
    response.with_body(streams.create_stream(b""))
}
