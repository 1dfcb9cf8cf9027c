//! Dev server integration tests over real HTTP.

use std::sync::Arc;

use http_runner::config::RunnerConfig;
use http_runner::http::{Body, Response, ServerRequest};
use http_runner::runner::{EchoHandler, HandlerError, StaticContainerFactory};

mod common;

use common::{ok_handler, start_dev_server};

#[tokio::test]
async fn serves_requests_through_the_runner() {
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(EchoHandler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/hello?x=1"))
        .header("X-Custom", "yes")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = resp.text().await.unwrap();
    assert!(body.starts_with(&format!("GET http://{addr}/hello?x=1 HTTP/1.1\n")));
    assert!(body.to_ascii_lowercase().contains("x-custom: yes"));
    assert!(body.contains(r#"query: {"x":"1"}"#));

    shutdown.trigger();
}

#[tokio::test]
async fn form_posts_are_parsed() {
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(EchoHandler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/submit"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("name=ann&tags[]=a&tags[]=b")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains(r#"parsed body: {"name":"ann","tags":["a","b"]}"#));
    assert!(body.contains("body: 26 bytes"));

    shutdown.trigger();
}

#[tokio::test]
async fn head_requests_have_no_body() {
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(ok_handler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let resp = reqwest::Client::new()
        .head(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.bytes().await.unwrap().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn status_and_headers_are_forwarded() {
    let handler = |_: ServerRequest| -> Result<Response, HandlerError> {
        Ok(Response::new(201)?
            .with_header("Set-Cookie", ["a=1", "b=2"])?
            .with_body(Body::from_bytes("created")))
    };
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(handler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let resp = reqwest::get(format!("http://{addr}/items")).await.unwrap();

    assert_eq!(resp.status(), 201);
    let cookies: Vec<_> = resp
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, ["a=1", "b=2"]);
    assert_eq!(resp.headers()["content-length"], "7");
    assert_eq!(resp.text().await.unwrap(), "created");

    shutdown.trigger();
}

#[tokio::test]
async fn invalid_json_is_rejected_with_400() {
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(ok_handler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api"))
        .header("Content-Type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(resp.status().canonical_reason(), Some("Bad Request"));

    shutdown.trigger();
}

#[tokio::test]
async fn custom_reason_phrase_reaches_the_client() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let containers = Arc::new(StaticContainerFactory::new(Arc::new(ok_handler)));
    let (addr, shutdown) = start_dev_server(containers, RunnerConfig::default()).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /api HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
         Content-Length: 7\r\nConnection: close\r\n\r\n{{broken"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let reply = String::from_utf8_lossy(&reply);
    assert!(
        reply.starts_with("HTTP/1.1 400 Error when parsing JSON request body.\r\n"),
        "{reply}"
    );

    shutdown.trigger();
}

#[tokio::test]
async fn oversized_bodies_are_refused() {
    let mut config = RunnerConfig::default();
    config.server.max_body_size = 16;
    let containers = Arc::new(StaticContainerFactory::new(Arc::new(ok_handler)));
    let (addr, shutdown) = start_dev_server(containers, config).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/upload"))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 413);

    shutdown.trigger();
}
