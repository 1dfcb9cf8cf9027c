//! Request handlers, middlewares and the error catcher.
//!
//! # Responsibilities
//! - Define the handler and middleware seams of the application pipeline
//! - Run middlewares in order, ending at a fallback handler
//! - Turn dispatch failures into responses (`ErrorCatcher`)
//!
//! # Design Decisions
//! - Dispatch failures are `HandlerError` values; the caught panic of a handler
//!   becomes `HandlerError::Panicked` so it takes the same path
//! - The error catcher receives the failure through a handler that re-raises
//!   it, so catchers are written like any other middleware

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::http::error::{MessageError, RequestError, StreamError};
use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::http::stream::Body;
use crate::runner::events::{Event, EventDispatcher};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure raised while dispatching a request.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A handler or middleware panicked.
    #[error("request handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(BoxError),
}

impl HandlerError {
    pub fn other(error: impl Into<BoxError>) -> Self {
        HandlerError::Other(error.into())
    }
}

pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(ServerRequest) -> Result<Response, HandlerError> + Send + Sync,
{
    fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError> {
        self(request)
    }
}

pub trait Middleware: Send + Sync {
    /// Name reported in middleware events.
    fn name(&self) -> &str {
        "middleware"
    }

    fn process(&self, request: ServerRequest, next: &dyn RequestHandler) -> Result<Response, HandlerError>;
}

/// Ordered middleware stack.
#[derive(Clone)]
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    events: Arc<dyn EventDispatcher>,
}

impl MiddlewarePipeline {
    pub fn new(events: Arc<dyn EventDispatcher>) -> Self {
        Self {
            middlewares: Vec::new(),
            events,
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the stack; `fallback` answers when every middleware delegates.
    pub fn dispatch(&self, request: ServerRequest, fallback: &dyn RequestHandler) -> Result<Response, HandlerError> {
        Next {
            middlewares: &self.middlewares,
            events: self.events.as_ref(),
            fallback,
        }
        .handle(request)
    }
}

struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    events: &'a dyn EventDispatcher,
    fallback: &'a dyn RequestHandler,
}

impl RequestHandler for Next<'_> {
    fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError> {
        let Some((current, rest)) = self.middlewares.split_first() else {
            return self.fallback.handle(request);
        };

        let next = Next {
            middlewares: rest,
            events: self.events,
            fallback: self.fallback,
        };
        self.events.dispatch(&Event::BeforeMiddleware(current.name().to_string()));
        let result = current.process(request, &next);
        self.events.dispatch(&Event::AfterMiddleware(current.name().to_string()));
        result
    }
}

/// Answers every request with `404 Not Found`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

impl RequestHandler for NotFoundHandler {
    fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError> {
        let body = format!("Not Found: {} {}", request.method(), request.uri().path());
        Ok(Response::new(404)?
            .with_header("Content-Type", ["text/plain; charset=utf-8"])?
            .with_body(Body::from_bytes(body)))
    }
}

/// Plain-text summary of the request. Used by the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError> {
        let mut out = String::new();
        let _ = writeln!(out, "{} {} HTTP/{}", request.method(), request.uri(), request.protocol_version());
        for (name, values) in request.headers().iter() {
            for value in values {
                let _ = writeln!(out, "{name}: {value}");
            }
        }
        if !request.query_params().is_empty() {
            let _ = writeln!(out, "query: {}", serde_json::Value::Object(request.query_params().clone()));
        }
        if let Some(parsed) = request.parsed_body() {
            let _ = writeln!(out, "parsed body: {parsed}");
        }
        if !request.uploaded_files().is_empty() {
            let names: Vec<_> = request.uploaded_files().iter().map(|(k, _)| k.as_str()).collect();
            let _ = writeln!(out, "files: {}", names.join(", "));
        }
        let body = request.body();
        if body.is_readable() {
            let raw = body.to_bytes()?;
            let _ = writeln!(out, "body: {} bytes", raw.len());
        }

        Ok(Response::ok()
            .with_header("Content-Type", ["text/plain; charset=utf-8"])?
            .with_body(Body::from_bytes(out)))
    }
}

/// Turns a dispatch failure into a response. Must not fail itself.
pub trait ErrorCatcher: Send + Sync {
    fn process(&self, request: ServerRequest, handler: &dyn RequestHandler) -> Response;
}

/// Handler that re-raises a captured failure once.
pub struct ThrowableHandler {
    error: Mutex<Option<HandlerError>>,
}

impl ThrowableHandler {
    pub fn new(error: HandlerError) -> Self {
        Self {
            error: Mutex::new(Some(error)),
        }
    }
}

impl RequestHandler for ThrowableHandler {
    fn handle(&self, _request: ServerRequest) -> Result<Response, HandlerError> {
        let error = self.error.lock().expect("throwable handler mutex poisoned").take();
        Err(error.unwrap_or_else(|| HandlerError::other("failure was already re-raised")))
    }
}

/// `500 Internal Server Error` as plain text; the error chain in debug mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextErrorCatcher {
    debug: bool,
}

impl PlainTextErrorCatcher {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn render(&self, error: &HandlerError) -> String {
        if !self.debug {
            return "An internal server error occurred.".to_string();
        }
        let mut out = format!("An internal server error occurred.\n\n{error}");
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(out, "\ncaused by: {cause}");
            source = cause.source();
        }
        out
    }
}

impl ErrorCatcher for PlainTextErrorCatcher {
    fn process(&self, request: ServerRequest, handler: &dyn RequestHandler) -> Response {
        let error = match handler.handle(request) {
            Ok(response) => return response,
            Err(error) => error,
        };

        let body = Body::from_bytes(self.render(&error));
        let mut response = Response::ok().with_body(body);
        if let Ok(with_status) = response.with_status(500, "") {
            response = with_status;
        }
        response
            .with_header("Content-Type", ["text/plain; charset=utf-8"])
            .unwrap_or(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{ServerParams, Uri};
    use crate::runner::events::ListenerDispatcher;

    fn request() -> ServerRequest {
        ServerRequest::new("GET", Uri::new().with_path("/missing"), ServerParams::new())
    }

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn process(&self, request: ServerRequest, next: &dyn RequestHandler) -> Result<Response, HandlerError> {
            let response = next.handle(request)?;
            Ok(response.with_added_header("X-Trail", self.0)?)
        }
    }

    #[test]
    fn pipeline_runs_in_order_and_falls_back() {
        let pipeline = MiddlewarePipeline::new(Arc::new(ListenerDispatcher::new()))
            .with_middleware(Arc::new(Tag("outer")))
            .with_middleware(Arc::new(Tag("inner")));

        let response = pipeline.dispatch(request(), &NotFoundHandler).unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(response.header("x-trail"), ["inner", "outer"]);
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |_: ServerRequest| -> Result<Response, HandlerError> { Ok(Response::new(201)?) };
        let pipeline = MiddlewarePipeline::new(Arc::new(ListenerDispatcher::new()));
        assert_eq!(pipeline.dispatch(request(), &handler).unwrap().status(), 201);
    }

    #[test]
    fn error_catcher_renders_500() {
        let handler = ThrowableHandler::new(HandlerError::other("database is down"));
        let response = PlainTextErrorCatcher::new(false).process(request(), &handler);
        assert_eq!(response.status(), 500);
        assert_eq!(response.body().to_bytes().unwrap(), b"An internal server error occurred.");

        let handler = ThrowableHandler::new(HandlerError::other("database is down"));
        let response = PlainTextErrorCatcher::new(true).process(request(), &handler);
        let text = String::from_utf8(response.body().to_bytes().unwrap()).unwrap();
        assert!(text.contains("database is down"));
    }

    #[test]
    fn throwable_handler_raises_once() {
        let handler = ThrowableHandler::new(HandlerError::Panicked("boom".to_string()));
        assert!(matches!(handler.handle(request()), Err(HandlerError::Panicked(_))));
        assert!(matches!(handler.handle(request()), Err(HandlerError::Other(_))));
    }

    #[test]
    fn echo_handler_summarizes_request() {
        let request = request()
            .with_header("Accept", ["text/plain"])
            .unwrap()
            .with_body(Body::from_bytes("abc"));
        let response = EchoHandler.handle(request).unwrap();
        let text = String::from_utf8(response.body().to_bytes().unwrap()).unwrap();
        assert!(text.starts_with("GET /missing HTTP/1.1\n"));
        assert!(text.contains("Accept: text/plain"));
        assert!(text.contains("body: 3 bytes"));
    }
}
