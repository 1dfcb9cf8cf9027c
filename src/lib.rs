//! HTTP application runner.
//!
//! Runs one request through an application and writes the response to the
//! host output channel: CGI on stdin/stdout, or a development HTTP server.

pub mod config;
pub mod emitter;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod runner;

pub use config::schema::RunnerConfig;
pub use emitter::{Emitter, OutputContext, SapiEmitter};
pub use http::DevServer;
pub use lifecycle::Shutdown;
pub use runner::{HttpRunner, RunnerError};
