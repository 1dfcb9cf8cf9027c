//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;

use http_runner::config::RunnerConfig;
use http_runner::emitter::{CaptureSink, OutputContext};
use http_runner::http::{Body, Response, ServerParams, ServerRequest, Uri};
use http_runner::lifecycle::Shutdown;
use http_runner::runner::{
    ContainerFactory, HandlerError, HttpRunner, ListenerDispatcher, RequestHandler, StaticContainerFactory,
};
use http_runner::DevServer;

/// Event names (with the response status when there is one) in dispatch order.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn recording_events() -> (ListenerDispatcher, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let dispatcher = ListenerDispatcher::new().listen_all(move |event| {
        let entry = match event.status() {
            Some(status) => format!("{}:{status}", event.name()),
            None => event.name().to_string(),
        };
        sink.lock().unwrap().push(entry);
    });
    (dispatcher, log)
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Handler answering `200 OK` with body "OK".
pub fn ok_handler(_: ServerRequest) -> Result<Response, HandlerError> {
    Ok(Response::ok().with_body(Body::from_bytes("OK")))
}

pub fn request(method: &str, path: &str) -> ServerRequest {
    ServerRequest::new(method, Uri::new().with_path(path), ServerParams::new())
}

pub struct Harness {
    pub runner: HttpRunner,
    pub output: OutputContext,
    pub capture: CaptureSink,
    pub events: EventLog,
}

/// Runner over a capturing output context, recording every event.
pub fn harness(handler: Arc<dyn RequestHandler>, config: RunnerConfig) -> Harness {
    let (dispatcher, events) = recording_events();
    let containers = StaticContainerFactory::new(handler).with_events(Arc::new(dispatcher));
    harness_with(Arc::new(containers), config, events)
}

pub fn harness_with(containers: Arc<dyn ContainerFactory>, config: RunnerConfig, events: EventLog) -> Harness {
    let (output, capture) = OutputContext::capture();
    let runner = HttpRunner::new(config, containers, output.clone()).unwrap();
    Harness {
        runner,
        output,
        capture,
        events,
    }
}

/// Start a dev server on an ephemeral port.
pub async fn start_dev_server(containers: Arc<dyn ContainerFactory>, config: RunnerConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = DevServer::new(config, containers);
    let signal = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}
