//! Where the runner gets its request from.

use std::sync::Mutex;

use crate::http::error::RequestError;
use crate::http::factory::RequestFactory;
use crate::http::form::{parse_cookies, parse_form};
use crate::http::host::{BodySource, HostInput, HostRequest, StdinInput};
use crate::http::request::{ServerParams, ServerRequest};
use crate::runner::container::Container;
use crate::runner::http_runner::RunnerError;

pub trait ApplicationRequestFactory: Send + Sync {
    fn create(&self, container: &Container) -> Result<ServerRequest, RunnerError>;
}

/// Builds the request from process environment variables and standard input,
/// the way a CGI host hands them over.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentRequestFactory {
    vars: Option<Vec<(String, String)>>,
}

impl EnvironmentRequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use these variables instead of the process environment.
    pub fn with_vars(vars: Vec<(String, String)>) -> Self {
        Self { vars: Some(vars) }
    }

    fn server_params(&self) -> ServerParams {
        match &self.vars {
            Some(vars) => vars.iter().cloned().collect(),
            // Header values from the client need not be valid UTF-8.
            None => std::env::vars_os()
                .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
                .collect(),
        }
    }
}

impl ApplicationRequestFactory for EnvironmentRequestFactory {
    fn create(&self, container: &Container) -> Result<ServerRequest, RunnerError> {
        let factory = container.get::<RequestFactory>()?;
        let server = self.server_params();

        let query = parse_form(server.get("QUERY_STRING").unwrap_or_default());
        let cookies = server.get("HTTP_COOKIE").map(parse_cookies).unwrap_or_default();
        let stdin = StdinInput {
            content_length: server.get("CONTENT_LENGTH").and_then(|v| v.trim().parse().ok()),
        };
        let url_encoded = server.get("REQUEST_METHOD") == Some("POST")
            && server
                .get("CONTENT_TYPE")
                .is_some_and(|t| t.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"));

        let mut host = HostRequest::new(server).with_query(query).with_cookies(cookies);
        host = if url_encoded {
            let raw = stdin.open().map_err(RequestError::from)?.contents().map_err(RequestError::from)?;
            host.with_post(parse_form(&String::from_utf8_lossy(&raw)))
                .with_body(BodySource::Bytes(raw))
        } else {
            host.with_body(BodySource::Stream(stdin.open().map_err(RequestError::from)?))
        };

        tracing::debug!("Request created from environment");
        Ok(factory.create(host)?)
    }
}

/// Builds the request from host data collected by an embedding server.
#[derive(Debug, Clone)]
pub struct HostRequestSource {
    host: HostRequest,
}

impl HostRequestSource {
    pub fn new(host: HostRequest) -> Self {
        Self { host }
    }
}

impl ApplicationRequestFactory for HostRequestSource {
    fn create(&self, container: &Container) -> Result<ServerRequest, RunnerError> {
        let factory = container.get::<RequestFactory>()?;
        Ok(factory.create(self.host.clone())?)
    }
}

/// Hands out a request set from outside. Used when embedding the runner.
#[derive(Debug, Default)]
pub struct MutableApplicationRequestFactory {
    request: Mutex<Option<ServerRequest>>,
}

impl MutableApplicationRequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_request(&self, request: ServerRequest) {
        *self.request.lock().expect("request factory mutex poisoned") = Some(request);
    }

    pub fn clear(&self) {
        self.request.lock().expect("request factory mutex poisoned").take();
    }
}

impl ApplicationRequestFactory for MutableApplicationRequestFactory {
    fn create(&self, _container: &Container) -> Result<ServerRequest, RunnerError> {
        self.request
            .lock()
            .expect("request factory mutex poisoned")
            .clone()
            .ok_or(RunnerError::RequestNotSet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::http::request::Uri;

    fn container() -> Container {
        Container::builder()
            .instance::<RequestFactory>(Arc::new(RequestFactory::default()))
            .build()
    }

    #[test]
    fn mutable_factory_requires_a_request() {
        let factory = MutableApplicationRequestFactory::new();
        let err = factory.create(&container()).unwrap_err();
        assert_eq!(err.to_string(), "Request is not set.");

        factory.set_request(ServerRequest::new("PUT", Uri::new(), ServerParams::new()));
        assert_eq!(factory.create(&container()).unwrap().method(), "PUT");
        // the request stays set
        assert_eq!(factory.create(&container()).unwrap().method(), "PUT");

        factory.clear();
        assert!(factory.create(&container()).is_err());
    }

    #[test]
    fn environment_factory_reads_variables() {
        let vars = [
            ("REQUEST_METHOD", "GET"),
            ("HTTP_HOST", "example.com"),
            ("REQUEST_URI", "/search?q=rust&page=2"),
            ("QUERY_STRING", "q=rust&page=2"),
            ("HTTP_COOKIE", "theme=dark"),
            ("HTTP_ACCEPT", "text/html"),
            ("CONTENT_LENGTH", "0"),
        ];
        let factory = EnvironmentRequestFactory::with_vars(
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );

        let request = factory.create(&container()).unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.uri().to_string(), "http://example.com/search?q=rust&page=2");
        assert_eq!(request.query_params()["q"], "rust");
        assert_eq!(request.cookie_params()["theme"], "dark");
        assert_eq!(request.header_line("accept"), "text/html");
    }

    #[cfg(unix)]
    #[test]
    fn environment_factory_tolerates_non_utf8_headers() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        std::env::set_var("REQUEST_METHOD", "GET");
        std::env::set_var("HTTP_X_NAME", OsString::from_vec(b"caf\xe9".to_vec()));

        let result = EnvironmentRequestFactory::new().create(&container());

        std::env::remove_var("HTTP_X_NAME");
        std::env::remove_var("REQUEST_METHOD");

        let request = result.unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.header_line("x-name"), "caf\u{FFFD}");
    }

    #[test]
    fn host_source_uses_host_data() {
        let server: ServerParams = [("REQUEST_METHOD", "DELETE"), ("REQUEST_URI", "/items/7")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let source = HostRequestSource::new(HostRequest::new(server).with_body(BodySource::Disabled));

        let request = source.create(&container()).unwrap();
        assert_eq!(request.method(), "DELETE");
        assert_eq!(request.uri().path(), "/items/7");
    }

    #[test]
    fn environment_factory_needs_a_method() {
        let factory = EnvironmentRequestFactory::with_vars(Vec::new());
        assert!(matches!(
            factory.create(&container()),
            Err(RunnerError::Request(RequestError::MissingMethod))
        ));
    }
}
