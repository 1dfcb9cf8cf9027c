//! Response emission subsystem.
//!
//! # Data Flow
//! ```text
//! post-processed Response
//!     → sapi.rs (framing rules, header/status order, chunked body)
//!     → output.rs (header table, buffer stack, headers-sent tracking)
//!     → ResponseSink (CGI stdout, raw HTTP, in-memory capture)
//! ```
//!
//! # Design Decisions
//! - "Headers already sent" is its own error variant carrying the origin, so
//!   callers can tell it apart from I/O failures
//! - `FakeEmitter` keeps the response instead of writing it, for tests and
//!   `run_and_get_response`

pub mod fake;
pub mod output;
pub mod sapi;

use thiserror::Error;

use crate::http::error::{MessageError, StreamError};
use crate::http::response::Response;

pub use fake::FakeEmitter;
pub use output::{CaptureSink, Captured, CgiSink, Head, HeadersOrigin, OutputContext, RawHttpSink, ResponseSink};
pub use sapi::SapiEmitter;

/// Writes one response to the host output channel.
pub trait Emitter: Send + Sync {
    /// Emit `response`. Must be called once per physical response.
    fn emit(&self, response: Response) -> Result<(), EmitError>;
}

/// Errors raised while emitting a response.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Output was produced before the emitter ran.
    #[error("HTTP headers have been sent.")]
    HeadersAlreadySent { file: String, line: u32 },

    /// The configured chunk size is not positive.
    #[error("Buffer size must be greater than zero.")]
    InvalidBufferSize(usize),

    /// Writing to the output channel failed.
    #[error("output channel error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading the response body failed.
    #[error("response body error: {0}")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl EmitError {
    /// Short, user facing name of the problem.
    pub fn name(&self) -> String {
        match self {
            EmitError::HeadersAlreadySent { .. } => "HTTP headers have been sent.".to_string(),
            other => other.to_string(),
        }
    }

    /// Hint on how to fix the problem, when there is one.
    pub fn solution(&self) -> Option<String> {
        match self {
            EmitError::HeadersAlreadySent { file, line } => Some(format!(
                "Headers already sent in {file} on line {line}\n\
                 Emitter can't send headers once the headers block has already been sent."
            )),
            _ => None,
        }
    }

    pub fn is_headers_already_sent(&self) -> bool {
        matches!(self, EmitError::HeadersAlreadySent { .. })
    }
}
