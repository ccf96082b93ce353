//! Forwarding handler against live mock upstreams

mod common;

use std::time::Duration;

use common::{closed_port, mock_upstream, silent_upstream};
use ferry::http::request::{Method, Request, RequestBuilder};
use ferry::http::response::StatusCode;
use ferry::proxy::forward::ProxyHandler;
use ferry::proxy::upstream::{UpstreamClient, UpstreamTarget};

fn handler_for(base: &str, timeout: Option<Duration>) -> ProxyHandler {
    let target = UpstreamTarget::parse(base).unwrap();
    ProxyHandler::new(UpstreamClient::new(target, timeout))
}

fn get(path: &str) -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .path(path)
        .header("Host", "proxy.local:8888")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_upstream_ok_is_relayed() {
    let upstream = mock_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: 1\r\nConnection: close\r\n\r\nhello",
    )
    .await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/greeting")).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"hello");
    assert_eq!(response.headers.get("X-Test"), Some("1"));
    assert!(!response.headers.contains("Content-Length"));
    assert!(!response.headers.contains("Connection"));
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let addr = closed_port().await;
    let handler = handler_for(&format!("http://{}", addr), None);

    let response = handler.handle(&get("/anything")).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.starts_with("Proxy Error: "), "unexpected body: {body}");
    assert!(body.len() > "Proxy Error: ".len());

    // The handler stays usable after a failure
    let again = handler.handle(&get("/anything")).await;
    assert_eq!(again.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let upstream = mock_upstream(
        b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/old")).await;

    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.headers.get("Location"), Some("/elsewhere"));
    assert_eq!(upstream.received().await.len(), 1);
}

#[tokio::test]
async fn test_request_is_forwarded_path_for_path() {
    let upstream = mock_upstream(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
    let handler = handler_for(&upstream.base_url(), None);
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/submit/form?draft=1")
        .header("Host", "proxy.local:8888")
        .header("Cookie", "session=abc; theme=dark")
        .header("X-Request-Tag", "t-1")
        .header("Content-Length", body.len().to_string())
        .body(body.clone())
        .build()
        .unwrap();

    let response = handler.handle(&request).await;
    assert_eq!(response.status.as_u16(), 201);

    let received = upstream.received().await;
    assert_eq!(received.len(), 1);
    let seen = &received[0];
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.path, "/submit/form?draft=1");
    assert_eq!(seen.header("Host"), Some(upstream.addr.to_string().as_str()));
    assert_eq!(seen.header("X-Request-Tag"), Some("t-1"));
    assert_eq!(seen.cookies().get("theme").map(String::as_str), Some("dark"));
    assert_eq!(seen.body, body);
}

#[tokio::test]
async fn test_every_relayed_method_reaches_upstream() {
    let upstream = mock_upstream(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    let handler = handler_for(&upstream.base_url(), None);

    for method in Method::FORWARDED {
        let request = RequestBuilder::new()
            .method(method.clone())
            .path("/items/1")
            .build()
            .unwrap();
        let response = handler.handle(&request).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    let methods: Vec<Method> = upstream.received().await.into_iter().map(|r| r.method).collect();
    assert_eq!(methods, Method::FORWARDED.to_vec());
}

#[tokio::test]
async fn test_unrelayed_method_answered_locally() {
    let upstream = mock_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    let handler = handler_for(&upstream.base_url(), None);

    let request = RequestBuilder::new()
        .method(Method::PATCH)
        .path("/items/1")
        .build()
        .unwrap();
    let response = handler.handle(&request).await;

    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers.get("Allow"), Some("GET, HEAD, POST, PUT, DELETE, OPTIONS"));
    assert!(upstream.received().await.is_empty());
}

#[tokio::test]
async fn test_oversized_chunk_size_is_bad_gateway() {
    let upstream = mock_upstream(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc",
    )
    .await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/huge")).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.starts_with("Proxy Error"), "unexpected body: {body}");
}

#[tokio::test]
async fn test_upstream_timeout_is_bad_gateway() {
    let addr = silent_upstream().await;
    let handler = handler_for(&format!("http://{}", addr), Some(Duration::from_millis(200)));

    let response = handler.handle(&get("/slow")).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.contains("did not respond"), "unexpected body: {body}");
}

#[tokio::test]
async fn test_chunked_gzip_body_passed_through() {
    let upstream = mock_upstream(
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\
          Content-Type: application/octet-stream\r\n\r\n3\r\n\x1f\x8b\x08\r\n0\r\n\r\n",
    )
    .await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/archive")).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, vec![0x1f, 0x8b, 0x08]);
    assert!(!response.headers.contains("Content-Encoding"));
    assert!(!response.headers.contains("Transfer-Encoding"));
    assert_eq!(response.headers.get("Content-Type"), Some("application/octet-stream"));
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let upstream = mock_upstream(
        b"HTTP/1.1 503 Service Unavailable\r\nRetry-After: 5\r\nContent-Length: 4\r\n\r\nbusy",
    )
    .await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/")).await;

    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.headers.get("Retry-After"), Some("5"));
    assert_eq!(response.body, b"busy");
}

#[tokio::test]
async fn test_garbage_from_upstream_is_bad_gateway() {
    let upstream = mock_upstream(b"this is not http\r\n\r\n").await;
    let handler = handler_for(&upstream.base_url(), None);

    let response = handler.handle(&get("/")).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert!(String::from_utf8(response.body).unwrap().contains("malformed upstream response"));
}
