//! Immutable server request value.
//!
//! # Responsibilities
//! - Hold method, URI, protocol version, headers and body of one exchange
//! - Carry host data (server params, cookies, query, parsed body, uploads)
//! - Carry out-of-band attributes such as the application start time
//!
//! # Design Decisions
//! - `with_*` transforms return new values; large parts sit behind `Arc`
//! - The URI stores the port as given and reports `None` for the scheme default
//! - Query params and parsed bodies are `serde_json::Value` trees, which
//!   covers both form fields (`a[b]=c`) and JSON documents

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::http::error::MessageError;
use crate::http::headers::HeaderMap;
use crate::http::stream::Body;
use crate::http::upload::UploadedFiles;

/// Request URI split into the parts the runner cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
    query: String,
}

impl Uri {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, `None` when absent or equal to the scheme default.
    pub fn port(&self) -> Option<u16> {
        match (self.scheme.as_str(), self.port) {
            ("http", Some(80)) | ("https", Some(443)) => None,
            (_, port) => port,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_ascii_lowercase();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_ascii_lowercase();
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.strip_prefix('?').unwrap_or(query).to_string();
        self
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}:", self.scheme)?;
        }
        if !self.host.is_empty() {
            write!(f, "//{}", self.host)?;
            if let Some(port) = self.port() {
                write!(f, ":{port}")?;
            }
        }
        if !self.host.is_empty() && !self.path.is_empty() && !self.path.starts_with('/') {
            f.write_str("/")?;
        }
        f.write_str(&self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

/// Ordered server/environment variables of the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerParams {
    entries: Vec<(String, String)>,
}

impl ServerParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a variable. Later duplicates shadow earlier ones.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a variable, replacing an existing one in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ServerParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct ServerRequest {
    method: String,
    uri: Uri,
    protocol: String,
    headers: Arc<HeaderMap>,
    server_params: Arc<ServerParams>,
    cookies: Arc<BTreeMap<String, String>>,
    query_params: Arc<Map<String, Value>>,
    parsed_body: Option<Arc<Value>>,
    uploaded_files: Arc<UploadedFiles>,
    body: Body,
    attributes: Arc<BTreeMap<String, Value>>,
}

impl ServerRequest {
    /// Request with empty headers, params and body.
    pub fn new(method: &str, uri: Uri, server_params: ServerParams) -> Self {
        Self {
            method: method.to_string(),
            uri,
            protocol: "1.1".to_string(),
            headers: Arc::new(HeaderMap::new()),
            server_params: Arc::new(server_params),
            cookies: Arc::default(),
            query_params: Arc::default(),
            parsed_body: None,
            uploaded_files: Arc::default(),
            body: Body::empty(),
            attributes: Arc::default(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
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

    pub fn server_params(&self) -> &ServerParams {
        &self.server_params
    }

    pub fn cookie_params(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn query_params(&self) -> &Map<String, Value> {
        &self.query_params
    }

    pub fn parsed_body(&self) -> Option<&Value> {
        self.parsed_body.as_deref()
    }

    pub fn uploaded_files(&self) -> &UploadedFiles {
        &self.uploaded_files
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn with_method(&self, method: &str) -> Self {
        let mut next = self.clone();
        next.method = method.to_string();
        next
    }

    pub fn with_uri(&self, uri: Uri) -> Self {
        let mut next = self.clone();
        next.uri = uri;
        next
    }

    pub fn with_protocol_version(&self, version: &str) -> Self {
        let mut next = self.clone();
        next.protocol = version.to_string();
        next
    }

    pub fn with_header<I, V>(&self, name: &str, values: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).set(name, values)?;
        Ok(next)
    }

    pub fn with_added_header(&self, name: &str, value: impl Into<String>) -> Result<Self, MessageError> {
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).append(name, value)?;
        Ok(next)
    }

    pub fn without_header(&self, name: &str) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.headers).remove(name);
        next
    }

    pub fn with_cookie_params(&self, cookies: BTreeMap<String, String>) -> Self {
        let mut next = self.clone();
        next.cookies = Arc::new(cookies);
        next
    }

    pub fn with_query_params(&self, query: Map<String, Value>) -> Self {
        let mut next = self.clone();
        next.query_params = Arc::new(query);
        next
    }

    pub fn with_parsed_body(&self, parsed: Option<Value>) -> Self {
        let mut next = self.clone();
        next.parsed_body = parsed.map(Arc::new);
        next
    }

    pub fn with_uploaded_files(&self, files: UploadedFiles) -> Self {
        let mut next = self.clone();
        next.uploaded_files = Arc::new(files);
        next
    }

    pub fn with_body(&self, body: Body) -> Self {
        let mut next = self.clone();
        next.body = body;
        next
    }

    pub fn with_attribute(&self, name: &str, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.attributes).insert(name.to_string(), value.into());
        next
    }

    pub fn without_attribute(&self, name: &str) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.attributes).remove(name);
        next
    }
}
