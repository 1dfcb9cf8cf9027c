//! Response post-processing middlewares.
//!
//! # Data Flow
//! ```text
//! dispatch result
//!     → remove_body.rs (no body for 1xx/204/205/304)
//!     → content_length.rs (Content-Length from body size)
//!     → head_request.rs (no body for HEAD)
//!     → emitter
//! ```
//!
//! # Design Decisions
//! - Each step is a pure `Response → Response` function, toggled by config
//! - The order above is fixed; disabling a step never reorders the others

pub mod content_length;
pub mod head_request;
pub mod remove_body;

use std::sync::Arc;

use crate::config::MiddlewareConfig;
use crate::http::error::MessageError;
use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::http::stream::StreamFactory;

pub use content_length::content_length;
pub use head_request::head_request;
pub use remove_body::remove_body_by_status;

/// The configured post-processing chain.
#[derive(Clone)]
pub struct PostProcessing {
    toggles: MiddlewareConfig,
    streams: Arc<dyn StreamFactory>,
}

impl PostProcessing {
    pub fn new(toggles: MiddlewareConfig, streams: Arc<dyn StreamFactory>) -> Self {
        Self { toggles, streams }
    }

    pub fn toggles(&self) -> MiddlewareConfig {
        self.toggles
    }

    /// Run the enabled steps in order.
    pub fn apply(&self, request: &ServerRequest, response: Response) -> Result<Response, MessageError> {
        let mut response = response;
        if self.toggles.remove_body_by_status {
            response = remove_body_by_status(response, self.streams.as_ref());
        }
        if self.toggles.content_length {
            response = content_length(response)?;
        }
        if self.toggles.head_request {
            response = head_request(request, response, self.streams.as_ref());
        }
        Ok(response)
    }
}
