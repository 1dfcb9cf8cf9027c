//! Immutable HTTP response value.
//!
//! # Responsibilities
//! - Hold status, reason phrase, protocol version, headers and body
//! - Provide `with_*` transforms that return new values
//! - Know which status codes forbid a body
//!
//! # Design Decisions
//! - Headers live behind an `Arc` and are copied only when a transform touches them
//! - The body handle is shared between copies; replacing it is a transform too
//! - Reason phrases default to the canonical phrase of the status code

use std::sync::Arc;

use axum::http::StatusCode;

use crate::http::error::MessageError;
use crate::http::headers::HeaderMap;
use crate::http::stream::Body;

/// Status codes that never carry a body.
pub const NO_BODY_STATUSES: [u16; 6] = [100, 101, 102, 204, 205, 304];

/// Returns true if the status code forbids a message body.
pub fn is_no_body_status(code: u16) -> bool {
    NO_BODY_STATUSES.contains(&code)
}

/// Canonical reason phrase for a status code, empty when unknown.
pub fn default_reason(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: String,
    protocol: String,
    headers: Arc<HeaderMap>,
    body: Body,
}

impl Response {
    /// Create a response with an empty body.
    pub fn new(status: u16) -> Result<Self, MessageError> {
        validate_status(status)?;
        Ok(Self {
            status,
            reason: default_reason(status).to_string(),
            protocol: "1.1".to_string(),
            headers: Arc::new(HeaderMap::new()),
            body: Body::empty(),
        })
    }

    /// `200 OK` with an empty body.
    pub fn ok() -> Self {
        Self {
            status: 200,
            reason: "OK".to_string(),
            protocol: "1.1".to_string(),
            headers: Arc::new(HeaderMap::new()),
            body: Body::empty(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn header(&self, name: &str) -> &[String] {
        self.headers.get(name)
    }

    pub fn header_line(&self, name: &str) -> String {
        self.headers.get_line(name)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// New status; an empty reason selects the canonical phrase.
    pub fn with_status(&self, status: u16, reason: &str) -> Result<Self, MessageError> {
        validate_status(status)?;
        let mut next = self.clone();
        next.status = status;
        next.reason = if reason.is_empty() {
            default_reason(status).to_string()
        } else {
            reason.to_string()
        };
        Ok(next)
    }

    pub fn with_protocol_version(&self, version: &str) -> Self {
        let mut next = self.clone();
        next.protocol = version.to_string();
        next
    }

    /// Replace all values of a header.
    pub fn with_header<I, V>(&self, name: &str, values: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).set(name, values)?;
        Ok(next)
    }

    /// Append one value to a header.
    pub fn with_added_header(&self, name: &str, value: impl Into<String>) -> Result<Self, MessageError> {
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).append(name, value)?;
        Ok(next)
    }

    pub fn without_header(&self, name: &str) -> Self {
        if !self.headers.contains(name) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).remove(name);
        next
    }

    pub fn with_body(&self, body: Body) -> Self {
        let mut next = self.clone();
        next.body = body;
        next
    }
}

fn validate_status(status: u16) -> Result<(), MessageError> {
    if (100..=599).contains(&status) {
        Ok(())
    } else {
        Err(MessageError::InvalidStatus(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_leave_original_untouched() {
        let original = Response::ok();
        let changed = original
            .with_header("X-Test", ["1"])
            .unwrap()
            .with_status(404, "")
            .unwrap();

        assert_eq!(original.status(), 200);
        assert!(!original.has_header("x-test"));
        assert_eq!(changed.status(), 404);
        assert_eq!(changed.reason_phrase(), "Not Found");
        assert_eq!(changed.header("x-test"), ["1"]);
    }

    #[test]
    fn headers_are_shared_until_changed() {
        let a = Response::ok().with_header("A", ["1"]).unwrap();
        let b = a.with_body(Body::from_bytes("x"));
        assert!(Arc::ptr_eq(&a.headers, &b.headers));

        let c = b.with_added_header("A", "2").unwrap();
        assert!(!Arc::ptr_eq(&b.headers, &c.headers));
        assert_eq!(b.header("a"), ["1"]);
        assert_eq!(c.header("a"), ["1", "2"]);
    }

    #[test]
    fn custom_reason_phrase() {
        let response = Response::ok().with_status(400, "Bad JSON").unwrap();
        assert_eq!(response.reason_phrase(), "Bad JSON");
    }

    #[test]
    fn rejects_out_of_range_status() {
        assert!(matches!(Response::new(99), Err(MessageError::InvalidStatus(99))));
        assert!(Response::ok().with_status(600, "").is_err());
        assert_eq!(Response::new(599).unwrap().reason_phrase(), "");
    }

    #[test]
    fn no_body_statuses() {
        for code in NO_BODY_STATUSES {
            assert!(is_no_body_status(code));
        }
        assert!(!is_no_body_status(200));
        assert!(!is_no_body_status(404));
    }
}
