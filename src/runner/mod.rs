//! Request lifecycle orchestration.
//!
//! # Responsibilities
//! - Build the service container and register error handling
//! - Obtain the request and dispatch it through the application
//! - Post-process and emit the response
//! - Fire lifecycle events in a fixed order, also on failure
//!
//! # Data Flow
//! ```text
//! HttpRunner::run
//!     → container.rs (services)       → error_handler.rs (panic hook)
//!     → request_source.rs (request)   → application.rs (events + pipeline)
//!     → handler.rs (middlewares, fallback, error catcher)
//!     → http::middleware (post-processing) → emitter
//! ```

pub mod application;
pub mod container;
pub mod error_handler;
pub mod events;
pub mod handler;
pub mod http_runner;
pub mod request_source;

pub use application::Application;
pub use container::{Container, ContainerBuilder, ContainerError, ContainerFactory, StaticContainerFactory};
pub use error_handler::{ErrorHandler, PanicHookErrorHandler};
pub use events::{Event, EventDispatcher, ListenerDispatcher};
pub use handler::{
    EchoHandler, ErrorCatcher, HandlerError, Middleware, MiddlewarePipeline, NotFoundHandler,
    PlainTextErrorCatcher, RequestHandler,
};
pub use http_runner::{HttpRunner, RunnerError, START_TIME_ATTRIBUTE};
pub use request_source::{
    ApplicationRequestFactory, EnvironmentRequestFactory, HostRequestSource,
    MutableApplicationRequestFactory,
};
