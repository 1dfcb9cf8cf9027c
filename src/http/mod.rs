//! HTTP message model and host integration.
//!
//! # Data Flow
//! ```text
//! host data (server variables, headers, stdin or bytes)
//!     → host.rs (HostRequest, body source)
//!     → factory.rs (ServerRequest: URI, headers, body, uploads, form fields)
//!     → [runner dispatches the application]
//!     → response.rs (immutable Response)
//!     → middleware/ (post-processing)
//!     → emitter
//! ```
//!
//! `server.rs` is the development server that feeds this chain from Axum.

pub mod error;
pub mod factory;
pub mod form;
pub mod headers;
pub mod host;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod stream;
pub mod upload;

pub use error::{MessageError, RequestError, StreamError};
pub use factory::RequestFactory;
pub use headers::HeaderMap;
pub use host::{BodySource, HostInput, HostRequest, StdinInput};
pub use request::{ServerParams, ServerRequest, Uri};
pub use response::Response;
pub use server::DevServer;
pub use stream::{Body, ByteStream, DefaultStreamFactory, StreamFactory};
pub use upload::{UploadError, UploadedFile};
