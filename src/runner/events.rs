//! Application lifecycle events.
//!
//! # Event Order
//! ```text
//! ApplicationStartup
//!   BeforeRequest
//!     BeforeMiddleware / AfterMiddleware (per middleware)
//!   AfterRequest(response?)
//! AfterEmit(response?)
//! ApplicationShutdown
//! ```
//!
//! `AfterRequest`, `AfterEmit` and `ApplicationShutdown` fire even when the
//! step before them failed.

use std::sync::Arc;

use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::runner::container::ContainerError;

#[derive(Debug, Clone)]
pub enum Event {
    ApplicationStartup,
    BeforeRequest(ServerRequest),
    BeforeMiddleware(String),
    AfterMiddleware(String),
    AfterRequest(Option<Response>),
    AfterEmit(Option<Response>),
    ApplicationShutdown,
}

impl Event {
    pub const NAMES: [&'static str; 7] = [
        "application_startup",
        "before_request",
        "before_middleware",
        "after_middleware",
        "after_request",
        "after_emit",
        "application_shutdown",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Event::ApplicationStartup => "application_startup",
            Event::BeforeRequest(_) => "before_request",
            Event::BeforeMiddleware(_) => "before_middleware",
            Event::AfterMiddleware(_) => "after_middleware",
            Event::AfterRequest(_) => "after_request",
            Event::AfterEmit(_) => "after_emit",
            Event::ApplicationShutdown => "application_shutdown",
        }
    }

    /// Status of the response carried by the event, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Event::AfterRequest(Some(r)) | Event::AfterEmit(Some(r)) => Some(r.status()),
            _ => None,
        }
    }
}

pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: &Event);

    /// Verify listener configuration. Run at startup when event checks are on.
    fn check(&self) -> Result<(), ContainerError> {
        Ok(())
    }
}

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Dispatches events to listeners registered by event name.
#[derive(Clone, Default)]
pub struct ListenerDispatcher {
    listeners: Vec<(String, Listener)>,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen<F>(mut self, event: &str, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.push((event.to_string(), Arc::new(listener)));
        self
    }

    /// Listen to every event.
    pub fn listen_all<F>(self, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listen("*", listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl EventDispatcher for ListenerDispatcher {
    fn dispatch(&self, event: &Event) {
        let name = event.name();
        tracing::debug!(event = name, status = ?event.status(), "Dispatching event");

        for (target, listener) in &self.listeners {
            if target == "*" || target == name {
                listener(event);
            }
        }
    }

    fn check(&self) -> Result<(), ContainerError> {
        let unknown: Vec<&str> = self
            .listeners
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| *name != "*" && !Event::NAMES.contains(name))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ContainerError::InvalidDefinition(format!(
                "listeners registered for unknown events: {}",
                unknown.join(", ")
            )))
        }
    }
}
