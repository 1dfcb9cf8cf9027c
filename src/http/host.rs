//! Raw request data as handed over by the host.
//!
//! # Responsibilities
//! - Collect the server variables, raw headers, cookies, query and form fields,
//!   upload metadata and body source of one exchange
//! - Abstract the host's raw input channel (stdin for CGI)
//!
//! # Design Decisions
//! - `headers: None` means the host has no "all headers" accessor; the request
//!   factory then rebuilds headers from `HTTP_*`/`CONTENT_*` variables
//! - The body source is an explicit enum; "no body" and "use host input" are
//!   distinct variants instead of sentinel values

use std::collections::BTreeMap;
use std::io;

use serde_json::{Map, Value};

use crate::http::error::StreamError;
use crate::http::request::ServerParams;
use crate::http::stream::Body;
use crate::http::upload::RawFileField;

/// Where the request body comes from.
#[derive(Debug, Clone, Default)]
pub enum BodySource {
    /// Read the host's raw input channel.
    #[default]
    Host,
    /// The request has no body.
    Disabled,
    /// Use this stream as is.
    Stream(Body),
    /// Wrap these bytes.
    Bytes(Vec<u8>),
}

/// The host's raw request input.
pub trait HostInput: Send + Sync {
    fn open(&self) -> Result<Body, StreamError>;
}

/// Process standard input, sized from `CONTENT_LENGTH` when known.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinInput {
    pub content_length: Option<u64>,
}

impl HostInput for StdinInput {
    fn open(&self) -> Result<Body, StreamError> {
        let stdin = io::stdin();
        // CGI hands over exactly CONTENT_LENGTH bytes.
        Ok(match self.content_length {
            Some(len) => Body::from_reader(io::Read::take(stdin, len), Some(len)),
            None => Body::from_reader(stdin, None),
        })
    }
}

/// Host data of one exchange.
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    pub server: ServerParams,
    pub headers: Option<Vec<(String, String)>>,
    pub cookies: BTreeMap<String, String>,
    pub query: Map<String, Value>,
    pub post: Map<String, Value>,
    pub files: Vec<(String, RawFileField)>,
    pub body: BodySource,
}

impl HostRequest {
    pub fn new(server: ServerParams) -> Self {
        Self {
            server,
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_cookies(mut self, cookies: BTreeMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    pub fn with_post(mut self, post: Map<String, Value>) -> Self {
        self.post = post;
        self
    }

    pub fn with_file(mut self, field: &str, raw: RawFileField) -> Self {
        self.files.push((field.to_string(), raw));
        self
    }

    pub fn with_body(mut self, body: BodySource) -> Self {
        self.body = body;
        self
    }
}
