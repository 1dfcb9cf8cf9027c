//! Body suppression for HEAD requests.

use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::http::stream::StreamFactory;

/// Replace the body with an empty stream when answering a HEAD request.
pub fn head_request(request: &ServerRequest, response: Response, streams: &dyn StreamFactory) -> Response {
    if request.method() != "HEAD" {
        return response;
    }
    response.with_body(streams.create_stream(b""))
}
