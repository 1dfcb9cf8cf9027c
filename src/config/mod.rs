//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RunnerConfig (validated, immutable)
//!     → CLI flags override (--debug)
//!     → handed to the runner and the dev server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    EmitterConfig, MiddlewareConfig, ObservabilityConfig, RequestConfig, RunnerConfig, ServerConfig,
    DEFAULT_BUFFER_SIZE,
};
