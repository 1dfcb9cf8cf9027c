//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! runner, emitter, dev server produce:
//!     → logging.rs (structured log events on stderr)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr of the CGI process or the server)
//!     → Metrics endpoint (Prometheus scrape, serve mode only)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through dev server spans
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
