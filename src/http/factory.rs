//! Server request construction from host data.
//!
//! # Responsibilities
//! - Build the URI from `HTTPS`, `SERVER_PORT`, `HTTP_HOST`, `SERVER_NAME`,
//!   `REQUEST_URI` and `QUERY_STRING`
//! - Rebuild headers from server variables when the host has no header accessor
//! - Attach body, form fields, query and cookie params, uploaded files
//! - Parse JSON bodies on demand (`parse_body`)
//!
//! # Design Decisions
//! - The `Host` header is seeded from the URI, so a supplied `Host` never
//!   duplicates it
//! - `HTTP_HOST` is split on a trailing `:digits` only outside of brackets, so
//!   `[::1]` and `[::1]:8080` both work; digits past 65535 fail the request
//! - Upload temp files are opened when first read; one that is gone yields
//!   an empty stream

use std::sync::Arc;

use serde_json::Value;

use crate::http::error::RequestError;
use crate::http::host::{BodySource, HostInput, HostRequest};
use crate::http::request::{ServerParams, ServerRequest, Uri};
use crate::http::stream::{DefaultStreamFactory, StreamFactory};
use crate::http::upload::build_uploaded_files;

const FORM_TYPES: [&str; 2] = ["application/x-www-form-urlencoded", "multipart/form-data"];

/// Builds immutable server requests from host data.
#[derive(Clone)]
pub struct RequestFactory {
    streams: Arc<dyn StreamFactory>,
    host_input: Option<Arc<dyn HostInput>>,
}

impl Default for RequestFactory {
    fn default() -> Self {
        Self::new(Arc::new(DefaultStreamFactory))
    }
}

impl RequestFactory {
    pub fn new(streams: Arc<dyn StreamFactory>) -> Self {
        Self {
            streams,
            host_input: None,
        }
    }

    /// Use `input` for requests whose body source is `BodySource::Host`.
    pub fn with_host_input(mut self, input: Arc<dyn HostInput>) -> Self {
        self.host_input = Some(input);
        self
    }

    pub fn stream_factory(&self) -> &Arc<dyn StreamFactory> {
        &self.streams
    }

    /// Build a request from host data.
    pub fn create(&self, host: HostRequest) -> Result<ServerRequest, RequestError> {
        let HostRequest {
            server,
            headers,
            cookies,
            query,
            post,
            files,
            body,
        } = host;

        let method = server
            .get("REQUEST_METHOD")
            .ok_or(RequestError::MissingMethod)?
            .to_string();

        let uri = create_uri(&server)?;
        let host_header = host_header(&uri);
        let headers = headers.unwrap_or_else(|| headers_from_server(&server));

        let mut request = ServerRequest::new(&method, uri, server);
        if let Some(host) = host_header {
            request = request.with_header("Host", [host])?;
        }

        for (name, value) in headers {
            if name.eq_ignore_ascii_case("Host") && request.has_header("Host") {
                continue;
            }
            request = request.with_added_header(&name, value)?;
        }

        let protocol = match request.server_params().get("SERVER_PROTOCOL") {
            Some(p) if !p.is_empty() => p.replace("HTTP/", ""),
            _ => "1.1".to_string(),
        };
        request = request.with_protocol_version(&protocol);

        request = match body {
            BodySource::Host => {
                let input = self.host_input.as_ref().ok_or_else(|| {
                    RequestError::InvalidBodySource("no host input channel is configured".to_string())
                })?;
                request.with_body(input.open()?)
            }
            BodySource::Disabled => request,
            BodySource::Stream(stream) => request.with_body(stream),
            BodySource::Bytes(bytes) => request.with_body(self.streams.create_stream(&bytes)),
        };

        if method == "POST" {
            let content_type = request.header_line("content-type");
            if FORM_TYPES.iter().any(|t| media_type_is(&content_type, t)) {
                request = request.with_parsed_body(Some(Value::Object(post)));
            }
        }

        let files = build_uploaded_files(&files, &self.streams)?;

        tracing::debug!(
            method = %method,
            uri = %request.uri(),
            headers = request.headers().len(),
            "Server request created"
        );

        Ok(request
            .with_query_params(query)
            .with_cookie_params(cookies)
            .with_uploaded_files(files))
    }

    /// Parse a JSON body into the parsed body.
    ///
    /// Applies to `application/json` and `application/*+json` requests that
    /// have a non-empty body and no parsed body yet.
    pub fn parse_body(&self, request: ServerRequest) -> Result<ServerRequest, RequestError> {
        if request.parsed_body().is_some() || !is_json(&request.header_line("content-type")) {
            return Ok(request);
        }

        let body = request.body();
        if !body.is_readable() {
            return Ok(request);
        }
        let raw = body.to_bytes()?;
        if raw.is_empty() {
            return Ok(request);
        }

        let value: Value = serde_json::from_slice(&raw)
            .map_err(|_| RequestError::BadRequest("Error when parsing JSON request body.".to_string()))?;

        match value {
            Value::Object(_) | Value::Array(_) => Ok(request.with_parsed_body(Some(value))),
            other => Err(RequestError::BadRequest(format!(
                "Parsed JSON must contain array, but \"{}\" given.",
                json_type_name(&other)
            ))),
        }
    }
}

fn create_uri(server: &ServerParams) -> Result<Uri, RequestError> {
    let https = matches!(server.get("HTTPS"), Some(v) if !v.is_empty() && v != "off");
    let scheme = if https { "https" } else { "http" };
    let default_port = if https { 443 } else { 80 };

    let mut uri = Uri::new().with_scheme(scheme).with_port(Some(
        server
            .get("SERVER_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(default_port),
    ));

    if let Some(host) = server.get("HTTP_HOST") {
        uri = match split_host_port(host)? {
            Some((name, port)) => uri.with_host(name).with_port(Some(port)),
            None => uri.with_host(host),
        };
    } else if let Some(name) = server.get("SERVER_NAME") {
        uri = uri.with_host(name);
    }

    let request_uri = server.get("REQUEST_URI");
    if let Some(target) = request_uri {
        uri = uri.with_path(target.split('?').next().unwrap_or_default());
    }

    Ok(match (server.get("QUERY_STRING"), request_uri.and_then(|t| t.split_once('?'))) {
        (Some(query), _) => uri.with_query(query),
        (None, Some((_, query))) => uri.with_query(query),
        (None, None) => uri,
    })
}

/// Split `host:port`. Bracketed IPv6 literals only split after the `]`.
///
/// Trailing digits that do not fit a port are an error, never part of the host.
fn split_host_port(value: &str) -> Result<Option<(&str, u16)>, RequestError> {
    let Some((host, port)) = value.rsplit_once(':') else {
        return Ok(None);
    };
    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Ok(None);
    }
    let port = port
        .parse()
        .map_err(|_| RequestError::InvalidPort(port.to_string()))?;
    Ok(Some((host, port)))
}

fn host_header(uri: &Uri) -> Option<String> {
    if uri.host().is_empty() {
        return None;
    }
    Some(match uri.port() {
        Some(port) => format!("{}:{port}", uri.host()),
        None => uri.host().to_string(),
    })
}

/// Headers from `HTTP_*` and `CONTENT_*` server variables.
pub fn headers_from_server(server: &ServerParams) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for (key, value) in server.iter() {
        let key = match key.strip_prefix("REDIRECT_") {
            Some(stripped) if server.contains(stripped) => continue,
            Some(stripped) => stripped,
            None => key,
        };

        let name = if let Some(rest) = key.strip_prefix("HTTP_") {
            normalize_header_name(rest)
        } else if key.starts_with("CONTENT_") {
            normalize_header_name(key)
        } else {
            continue;
        };

        match headers.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => headers.push((name, value.to_string())),
        }
    }

    headers
}

/// `CONTENT_TYPE` -> `Content-Type`.
fn normalize_header_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// `content_type` is `media_type`, optionally followed by parameters.
fn media_type_is(content_type: &str, media_type: &str) -> bool {
    match content_type.strip_prefix(media_type) {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.starts_with(';'),
        None => false,
    }
}

fn is_json(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json"
        || (media_type.starts_with("application/") && media_type.ends_with("+json"))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "array",
    }
}
