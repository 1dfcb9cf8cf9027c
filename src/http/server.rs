//! Development HTTP server.
//!
//! # Responsibilities
//! - Accept HTTP connections with Axum
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Map each request to CGI-style host data
//! - Run the synchronous runner on the blocking pool, one output context per
//!   exchange, and turn the captured output into the reply
//!
//! # Data Flow
//! ```text
//! axum Request
//!     → host_request (server variables, headers, cookies, query, form fields)
//!     → spawn_blocking: HttpRunner::run (OutputContext::capture)
//!     → Captured { head, body } → axum Response
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{request::Parts, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::ext::ReasonPhrase;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::RunnerConfig;
use crate::emitter::{Captured, EmitError, OutputContext};
use crate::http::form::{parse_cookies, parse_form};
use crate::http::host::{BodySource, HostRequest};
use crate::http::request::ServerParams;
use crate::lifecycle::Shutdown;
use crate::runner::{ContainerFactory, HostRequestSource, HttpRunner, RunnerError};

/// State shared by all requests.
#[derive(Clone)]
struct ServerState {
    config: Arc<RunnerConfig>,
    containers: Arc<dyn ContainerFactory>,
    local_addr: SocketAddr,
}

/// HTTP server running every request through its own `HttpRunner`.
pub struct DevServer {
    config: RunnerConfig,
    containers: Arc<dyn ContainerFactory>,
}

impl DevServer {
    pub fn new(config: RunnerConfig, containers: Arc<dyn ContainerFactory>) -> Self {
        Self { config, containers }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &RunnerConfig, state: ServerState) -> Router {
        Router::new()
            .route("/{*path}", any(runner_handler))
            .route("/", any(runner_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.server.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs))),
            )
    }

    /// Serve on `listener` until `shutdown` triggers.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "HTTP server starting");

        let state = ServerState {
            config: Arc::new(self.config.clone()),
            containers: self.containers,
            local_addr,
        };
        let app = Self::build_router(&self.config, state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

async fn runner_handler(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.config.server.max_body_size).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let host = host_request(&parts, peer, state.local_addr, body);
    let exchange = tokio::task::spawn_blocking(move || run_exchange(&state, host)).await;

    match exchange {
        Ok(Ok(captured)) => into_response(captured),
        Ok(Err(e)) => {
            tracing::error!(error = %e, method = %parts.method, uri = %parts.uri, "Runner failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Runner task aborted");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

fn run_exchange(state: &ServerState, host: HostRequest) -> Result<Captured, RunnerError> {
    let (output, capture) = OutputContext::capture();
    let runner = HttpRunner::new((*state.config).clone(), Arc::clone(&state.containers), output.clone())?
        .with_request_factory(Arc::new(HostRequestSource::new(host)));

    runner.run()?;
    output.finish().map_err(EmitError::from)?;
    Ok(capture.snapshot())
}

/// CGI-style host data for one request.
fn host_request(parts: &Parts, peer: SocketAddr, local: SocketAddr, body: Vec<u8>) -> HostRequest {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let query = parts.uri.query().unwrap_or_default().to_string();

    let mut server = ServerParams::new();
    server.insert("REQUEST_METHOD", parts.method.as_str());
    server.insert("REQUEST_URI", target);
    server.insert("QUERY_STRING", query.clone());
    server.insert("SERVER_PROTOCOL", format!("{:?}", parts.version));
    server.insert("SERVER_NAME", local.ip().to_string());
    server.insert("SERVER_PORT", local.port().to_string());
    server.insert("REMOTE_ADDR", peer.ip().to_string());
    server.insert("REMOTE_PORT", peer.port().to_string());
    server.insert("GATEWAY_INTERFACE", "CGI/1.1");

    let mut headers = Vec::with_capacity(parts.headers.len());
    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let var = name.as_str().to_ascii_uppercase().replace('-', "_");
        let var = if var == "CONTENT_TYPE" || var == "CONTENT_LENGTH" {
            var
        } else {
            format!("HTTP_{var}")
        };
        server.insert(var, value);
        headers.push((name.as_str().to_string(), value.to_string()));
    }

    let cookies = server.get("HTTP_COOKIE").map(parse_cookies).unwrap_or_default();
    let url_encoded = parts.method == "POST"
        && server
            .get("CONTENT_TYPE")
            .is_some_and(|t| t.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"));
    let post = if url_encoded {
        parse_form(&String::from_utf8_lossy(&body))
    } else {
        Default::default()
    };

    HostRequest::new(server)
        .with_headers(headers)
        .with_cookies(cookies)
        .with_query(parse_form(&query))
        .with_post(post)
        .with_body(BodySource::Bytes(body))
}

fn into_response(captured: Captured) -> Response {
    let Some(head) = captured.head else {
        tracing::error!("Runner finished without sending headers");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    };

    let mut response = Response::new(Body::from(captured.body));
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *response.status_mut() = status;
    if status.canonical_reason() != Some(head.reason.as_str()) {
        // Custom reason phrases only reach HTTP/1 clients.
        match ReasonPhrase::try_from(head.reason.clone()) {
            Ok(reason) => {
                tracing::debug!(status = head.status, reason = %head.reason, "Custom reason phrase");
                response.extensions_mut().insert(reason);
            }
            Err(_) => tracing::warn!(reason = %head.reason, "Dropping invalid reason phrase"),
        }
    }
    let headers = response.headers_mut();
    for (name, value) in &head.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}
