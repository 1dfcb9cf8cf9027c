//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runner.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Default emitter chunk size: 8 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 8_388_608;

/// Root configuration for the HTTP runner.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RunnerConfig {
    /// Verbose error rendering and debug registration of the error handler.
    pub debug: bool,

    /// Validate the event dispatcher configuration at startup.
    /// Follows `debug` when unset.
    pub check_events: Option<bool>,

    /// Response emitter settings.
    pub emitter: EmitterConfig,

    /// Post-processing middleware toggles.
    pub middleware: MiddlewareConfig,

    /// Request construction settings.
    pub request: RequestConfig,

    /// Development server settings (`serve` mode only).
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RunnerConfig {
    pub fn checks_events(&self) -> bool {
        self.check_events.unwrap_or(self.debug)
    }
}

/// Response emitter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Maximum number of body bytes written per chunk.
    pub buffer_size: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Toggles for the response post-processing middlewares.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Drop the body of 1xx/204/205/304 responses.
    pub remove_body_by_status: bool,

    /// Compute `Content-Length` from the body size.
    pub content_length: bool,

    /// Drop the body of responses to HEAD requests.
    pub head_request: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            remove_body_by_status: true,
            content_length: true,
            head_request: true,
        }
    }
}

/// Request construction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Parse JSON bodies and answer malformed ones with 400.
    pub parse_json_body: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            parse_json_body: true,
        }
    }
}

/// Development server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint (`serve` mode only).
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: RunnerConfig = toml::from_str("").unwrap();
        assert!(!config.debug);
        assert_eq!(config.emitter.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.middleware.remove_body_by_status);
        assert!(config.middleware.content_length);
        assert!(config.middleware.head_request);
        assert!(config.request.parse_json_body);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: RunnerConfig = toml::from_str(
            r#"
            debug = true

            [middleware]
            head_request = false

            [emitter]
            buffer_size = 1024
            "#,
        )
        .unwrap();
        assert!(config.debug);
        assert!(!config.middleware.head_request);
        assert!(config.middleware.content_length);
        assert_eq!(config.emitter.buffer_size, 1024);
        assert_eq!(config.server.request_timeout_secs, 30);
    }

    #[test]
    fn event_checks_follow_debug_unless_set() {
        let mut config = RunnerConfig::default();
        assert!(!config.checks_events());
        config.debug = true;
        assert!(config.checks_events());
        config.check_events = Some(false);
        assert!(!config.checks_events());
    }
}
