//! The HTTP application runner.
//!
//! # Data Flow
//! ```text
//! temporary error handler
//!     → ContainerFactory::create / bootstrap / event check
//!     → Application resolved, request built (+ applicationStartTime)
//!     → start → [parse JSON body] → handle ──error──→ ErrorCatcher
//!     → PostProcessing (remove body, Content-Length, HEAD)
//!     → Emitter
//!     → after_emit → shutdown            (always, even on failure)
//! ```
//!
//! # Design Decisions
//! - Only dispatch failures reach the error catcher. Emission failures such as
//!   "headers already sent" propagate to the caller
//! - `after_emit` and `shutdown` run from a drop guard so they also run when
//!   emission fails or panics

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::config::RunnerConfig;
use crate::emitter::{EmitError, Emitter, FakeEmitter, OutputContext, SapiEmitter};
use crate::http::error::{MessageError, RequestError};
use crate::http::factory::RequestFactory;
use crate::http::middleware::PostProcessing;
use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::http::stream::{Body, StreamFactory};
use crate::observability::metrics;
use crate::runner::application::Application;
use crate::runner::container::{Container, ContainerError, ContainerFactory};
use crate::runner::error_handler::{ErrorHandler, PanicHookErrorHandler};
use crate::runner::events::EventDispatcher;
use crate::runner::handler::{ErrorCatcher, HandlerError, ThrowableHandler};
use crate::runner::request_source::{ApplicationRequestFactory, EnvironmentRequestFactory};

/// Request attribute holding the run start time, seconds since the epoch.
pub const START_TIME_ATTRIBUTE: &str = "applicationStartTime";

/// Failures that abort a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Request is not set.")]
    RequestNotSet,

    #[error("No response was emitted.")]
    NoResponse,
}

impl RunnerError {
    pub fn is_headers_already_sent(&self) -> bool {
        matches!(self, RunnerError::Emit(e) if e.is_headers_already_sent())
    }
}

/// Runs one request through the application and emits the response.
pub struct HttpRunner {
    config: RunnerConfig,
    containers: Arc<dyn ContainerFactory>,
    emitter: Arc<dyn Emitter>,
    requests: Arc<dyn ApplicationRequestFactory>,
    temporary_error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl HttpRunner {
    /// Runner writing through `output` with the configured buffer size.
    pub fn new(
        config: RunnerConfig,
        containers: Arc<dyn ContainerFactory>,
        output: OutputContext,
    ) -> Result<Self, RunnerError> {
        let emitter = SapiEmitter::new(output, Some(config.emitter.buffer_size))?;
        Ok(Self {
            config,
            containers,
            emitter: Arc::new(emitter),
            requests: Arc::new(EnvironmentRequestFactory::new()),
            temporary_error_handler: None,
        })
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_request_factory(mut self, requests: Arc<dyn ApplicationRequestFactory>) -> Self {
        self.requests = requests;
        self
    }

    /// Handler registered until the container's own one is available.
    pub fn with_temporary_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.temporary_error_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run once with the configured emitter and request source.
    pub fn run(&self) -> Result<(), RunnerError> {
        self.run_with(self.emitter.as_ref(), None)
    }

    /// Run once and return the response instead of writing it.
    ///
    /// `request` replaces the configured request source when given.
    pub fn run_and_get_response(&self, request: Option<ServerRequest>) -> Result<Response, RunnerError> {
        let emitter = FakeEmitter::new();
        self.run_with(&emitter, request)?;
        emitter.take().ok_or(RunnerError::NoResponse)
    }

    fn run_with(&self, emitter: &dyn Emitter, request: Option<ServerRequest>) -> Result<(), RunnerError> {
        let started = Instant::now();
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let debug = self.config.debug;

        let temporary = self
            .temporary_error_handler
            .clone()
            .unwrap_or_else(|| Arc::new(PanicHookErrorHandler::temporary()));
        temporary.register(debug);

        let container = self.containers.create(&self.config)?;
        let error_handler = container.get::<dyn ErrorHandler>()?;
        temporary.unregister();
        error_handler.register(debug);

        self.containers.bootstrap(&container)?;
        if self.config.checks_events() {
            container.get::<dyn EventDispatcher>()?.check()?;
        }

        let application = container.get::<Application>()?;
        let request = match request {
            Some(request) => request,
            None => self.requests.create(&container)?,
        };
        let request = request.with_attribute(START_TIME_ATTRIBUTE, start_time);
        let post_processing = PostProcessing::new(self.config.middleware, container.get::<dyn StreamFactory>()?);

        tracing::debug!(method = %request.method(), uri = %request.uri(), "Running request");

        let mut scope = EmitScope {
            application: &application,
            response: None,
        };

        application.start();
        let response = match self.dispatch(&application, &container, request.clone())? {
            Ok(response) => response,
            Err(error) => {
                metrics::record_dispatch_failure();
                tracing::error!(error = %error, method = %request.method(), uri = %request.uri(), "Request dispatch failed");
                let catcher = container.get::<dyn ErrorCatcher>()?;
                catcher.process(request.clone(), &ThrowableHandler::new(error))
            }
        };
        scope.response = Some(response.clone());

        let status = response.status();
        let response = post_processing.apply(&request, response)?;
        emitter.emit(response)?;

        metrics::record_request(request.method(), status, started);
        tracing::debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "Response emitted");
        Ok(())
    }

    /// Parse the body when enabled, then hand the request to the application.
    ///
    /// The outer result carries fatal errors, the inner one dispatch failures.
    fn dispatch(
        &self,
        application: &Application,
        container: &Container,
        request: ServerRequest,
    ) -> Result<Result<Response, HandlerError>, RunnerError> {
        let request = if self.config.request.parse_json_body {
            match container.get::<RequestFactory>()?.parse_body(request) {
                Ok(request) => request,
                Err(RequestError::BadRequest(reason)) => {
                    tracing::warn!(reason = %reason, "Rejecting request body");
                    return Ok(Ok(bad_request(&reason)?));
                }
                Err(other) => return Ok(Err(other.into())),
            }
        } else {
            request
        };

        Ok(application.handle(request))
    }
}

/// `400` with the message as reason phrase and an unreadable body.
pub fn bad_request(reason: &str) -> Result<Response, MessageError> {
    Ok(Response::new(400)?
        .with_status(400, reason)?
        .with_body(Body::unreadable()))
}

/// Fires `after_emit` and `shutdown` when the run leaves its emit phase.
struct EmitScope<'a> {
    application: &'a Application,
    response: Option<Response>,
}

impl Drop for EmitScope<'_> {
    fn drop(&mut self) {
        self.application.after_emit(self.response.as_ref());
        self.application.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{ServerParams, Uri};
    use crate::runner::container::StaticContainerFactory;
    use crate::runner::handler::RequestHandler;

    fn runner(handler: Arc<dyn RequestHandler>, config: RunnerConfig) -> HttpRunner {
        let (output, _) = OutputContext::capture();
        HttpRunner::new(config, Arc::new(StaticContainerFactory::new(handler)), output).unwrap()
    }

    fn echo_start_time(request: ServerRequest) -> Result<Response, HandlerError> {
        let start = request
            .attribute(START_TIME_ATTRIBUTE)
            .and_then(|v| v.as_f64())
            .unwrap_or_default();
        Ok(Response::ok().with_body(Body::from_bytes(if start > 0.0 { "set" } else { "missing" })))
    }

    fn request(method: &str) -> ServerRequest {
        ServerRequest::new(method, Uri::new().with_path("/"), ServerParams::new())
    }

    #[test]
    fn start_time_attribute_is_set() {
        let runner = runner(Arc::new(echo_start_time), RunnerConfig::default());
        let response = runner.run_and_get_response(Some(request("GET"))).unwrap();
        assert_eq!(response.body().to_bytes().unwrap(), b"set");
        assert_eq!(response.header("content-length"), ["3"]);
    }

    #[test]
    fn invalid_buffer_size_is_rejected() {
        let mut config = RunnerConfig::default();
        config.emitter.buffer_size = 0;
        let (output, _) = OutputContext::capture();
        let result = HttpRunner::new(config, Arc::new(StaticContainerFactory::new(Arc::new(echo_start_time))), output);
        assert!(matches!(result, Err(RunnerError::Emit(EmitError::InvalidBufferSize(0)))));
    }

    #[test]
    fn invalid_json_becomes_400() {
        let runner = runner(Arc::new(echo_start_time), RunnerConfig::default());
        let request = request("POST")
            .with_header("Content-Type", ["application/json"])
            .unwrap()
            .with_body(Body::from_bytes("{not json"));

        let response = runner.run_and_get_response(Some(request)).unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(response.reason_phrase(), "Error when parsing JSON request body.");
        assert!(!response.body().is_readable());
        assert!(!response.has_header("content-length"));
    }

    #[test]
    fn json_parsing_can_be_disabled() {
        let mut config = RunnerConfig::default();
        config.request.parse_json_body = false;
        let runner = runner(Arc::new(echo_start_time), config);
        let request = request("POST")
            .with_header("Content-Type", ["application/json"])
            .unwrap()
            .with_body(Body::from_bytes("{not json"));

        assert_eq!(runner.run_and_get_response(Some(request)).unwrap().status(), 200);
    }

    #[test]
    fn bad_request_response_shape() {
        let response = bad_request("Parsed JSON must contain array, but \"string\" given.").unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(response.reason_phrase(), "Parsed JSON must contain array, but \"string\" given.");
        assert!(response.headers().is_empty());
        assert_eq!(response.body().size(), None);
        assert!(!response.body().is_seekable());
        assert!(!response.body().is_writable());
    }
}
