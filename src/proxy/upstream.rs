//! Outbound HTTP/1.1 client
//!
//! Opens one TCP connection per forwarded request, writes the request,
//! and reads back a complete response. Redirects are never followed and
//! connections are never reused.

use crate::http::headers::HeaderMap;
use crate::http::request::Method;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::error::UpstreamError;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default buffer size for reads
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a response header section or a single chunk-size line
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Headers the client writes itself when framing the outbound leg.
const FRAMING_HEADERS: [&str; 4] = ["Host", "Content-Length", "Transfer-Encoding", "Connection"];

/// The fixed upstream every request is forwarded to.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Base URL without trailing slash (e.g., "http://localhost:8080")
    base: String,
    /// Path prefix of the base URL without trailing slash ("" for a bare host)
    path_prefix: String,
    host: String,
    port: u16,
    /// Value for the outbound `Host` header
    host_header: String,
}

impl UpstreamTarget {
    /// Parses and validates a base URL.
    ///
    /// Only plain `http://` targets are supported.
    pub fn parse(base: &str) -> Result<Self, UpstreamError> {
        let invalid = |reason: &str| UpstreamError::InvalidTarget {
            target: base.to_string(),
            reason: reason.to_string(),
        };

        let url = url::Url::parse(base).map_err(|e| invalid(&e.to_string()))?;

        if url.scheme() != "http" {
            return Err(invalid("only http:// targets are supported"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("target must not carry a query or fragment"));
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            path_prefix: url.path().trim_end_matches('/').to_string(),
            host,
            port,
            host_header,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full URL for an inbound path: `{base}/{path}`.
    ///
    /// The path is used literally. No percent-encoding, dot-segment removal
    /// or traversal checks are applied.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base, strip_leading_slash(path))
    }

    /// Request-target written on the outbound request line for `path`.
    pub fn request_target_for(&self, path: &str) -> String {
        format!("{}/{}", self.path_prefix, strip_leading_slash(path))
    }

    /// `host:port` to connect to.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn host_header(&self) -> &str {
        &self.host_header
    }
}

fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// A request ready to be written to the upstream.
#[derive(Debug)]
pub struct OutboundRequest<'a> {
    pub method: &'a Method,
    /// Full target URL, kept for logging
    pub url: String,
    /// Request-target for the request line
    pub request_target: String,
    pub headers: HeaderMap,
    pub body: &'a [u8],
}

/// Sends requests to the upstream target
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    target: UpstreamTarget,

    /// Limit for the whole exchange; `None` waits indefinitely
    request_timeout: Option<Duration>,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(target: UpstreamTarget, request_timeout: Option<Duration>) -> Self {
        Self {
            target,
            request_timeout,
        }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Perform one request/response exchange with the upstream.
    pub async fn send(&self, request: &OutboundRequest<'_>) -> Result<Response, UpstreamError> {
        match self.request_timeout {
            Some(limit) => timeout(limit, self.exchange(request))
                .await
                .map_err(|_| UpstreamError::Timeout(limit))?,
            None => self.exchange(request).await,
        }
    }

    async fn exchange(&self, request: &OutboundRequest<'_>) -> Result<Response, UpstreamError> {
        let addr = self.target.authority();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| UpstreamError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::trace!(upstream = %addr, "Connected to upstream");

        let request_bytes = self.build_http_request(request);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to upstream");

        read_http_response(&mut stream, request.method).await
    }

    /// Build HTTP request bytes to send upstream
    ///
    /// The client owns the framing of this leg: it writes `Host` for the
    /// target, a `Content-Length` for the body and `Connection: close`.
    /// Everything else in `request.headers` is written as given.
    pub fn build_http_request(&self, request: &OutboundRequest<'_>) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(512 + request.body.len());

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", request.method, request.request_target).as_bytes(),
        );
        buffer.extend_from_slice(format!("Host: {}\r\n", self.target.host_header()).as_bytes());

        for (key, value) in request.headers.iter() {
            if FRAMING_HEADERS.iter().any(|h| key.eq_ignore_ascii_case(h)) {
                continue;
            }
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        if !request.body.is_empty() || matches!(request.method, Method::POST | Method::PUT) {
            buffer.extend_from_slice(format!("Content-Length: {}\r\n", request.body.len()).as_bytes());
        }
        buffer.extend_from_slice(b"Connection: close\r\n");

        // End of headers
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(request.body);

        buffer
    }
}

/// Read a complete HTTP/1.x response from `stream`.
///
/// Interim 1xx responses are skipped. The body is delimited by chunked
/// transfer coding, `Content-Length`, or end of stream, in that order of
/// precedence. Chunked framing is removed; content codings are left alone.
/// A response to `HEAD` never has a body, whatever its headers announce.
pub async fn read_http_response<R>(
    stream: &mut R,
    request_method: &Method,
) -> Result<Response, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let headers_end = loop {
            if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break end;
            }

            // Prevent unbounded header growth
            if buffer.len() > MAX_HEAD_BYTES {
                return Err(UpstreamError::malformed("response headers too large"));
            }

            if read_more(stream, &mut buffer).await? == 0 {
                return Err(UpstreamError::malformed(
                    "connection closed before complete response headers",
                ));
            }
        };

        let head = buffer.split_to(headers_end + 4);
        let (status, headers) = parse_response_head(&head[..headers_end])?;

        if status.is_informational() && status.as_u16() != 101 {
            tracing::trace!(status = status.as_u16(), "Skipping interim response");
            continue;
        }

        let body = if *request_method == Method::HEAD {
            Vec::new()
        } else {
            read_response_body(stream, &mut buffer, status, &headers).await?
        };

        return Ok(ResponseBuilder::new(status)
            .headers(headers)
            .body(body)
            .build());
    }
}

/// Parse the status line and header fields
fn parse_response_head(head: &[u8]) -> Result<(StatusCode, HeaderMap), UpstreamError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| UpstreamError::malformed("invalid UTF-8 in response headers"))?;

    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(UpstreamError::malformed(format!("invalid status line: {status_line}")));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or_else(|| UpstreamError::malformed(format!("invalid status code: {status_line}")))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok((status, headers))
}

async fn read_response_body<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<Vec<u8>, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    if status.is_bodiless() {
        return Ok(Vec::new());
    }

    let chunked = headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .last()
        .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);

    if chunked {
        return read_chunked_body(stream, buffer).await;
    }

    if let Some(cl) = headers.get("Content-Length") {
        let content_length: usize = cl
            .trim()
            .parse()
            .map_err(|_| UpstreamError::malformed(format!("invalid Content-Length: {cl}")))?;

        fill_to(stream, buffer, content_length).await?;
        return Ok(buffer.split_to(content_length).to_vec());
    }

    // No framing: the body runs until the upstream closes the connection
    while read_more(stream, buffer).await? != 0 {}
    Ok(buffer.split().to_vec())
}

async fn read_chunked_body<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<Vec<u8>, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let size_line = read_line(stream, buffer).await?;
        let size_str = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| UpstreamError::malformed(format!("invalid chunk size: {size_line}")))?;

        if size == 0 {
            // Trailer fields are discarded up to the terminating blank line
            while !read_line(stream, buffer).await?.is_empty() {}
            return Ok(body);
        }

        let framed = size
            .checked_add(2)
            .ok_or_else(|| UpstreamError::malformed("chunk size too large"))?;

        fill_to(stream, buffer, framed).await?;
        if &buffer[size..framed] != b"\r\n" {
            return Err(UpstreamError::malformed("chunk not terminated by CRLF"));
        }
        body.extend_from_slice(&buffer[..size]);
        buffer.advance(framed);
    }
}

async fn read_line<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<String, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buffer.windows(2).position(|w| w == b"\r\n") {
            let line = buffer.split_to(pos);
            buffer.advance(2);
            return String::from_utf8(line.to_vec())
                .map_err(|_| UpstreamError::malformed("invalid UTF-8 in chunk framing"));
        }

        if buffer.len() > MAX_HEAD_BYTES {
            return Err(UpstreamError::malformed("chunk framing line too long"));
        }

        if read_more(stream, buffer).await? == 0 {
            return Err(UpstreamError::malformed("connection closed inside chunked body"));
        }
    }
}

async fn fill_to<R>(stream: &mut R, buffer: &mut BytesMut, len: usize) -> Result<(), UpstreamError>
where
    R: AsyncRead + Unpin,
{
    while buffer.len() < len {
        if read_more(stream, buffer).await? == 0 {
            return Err(UpstreamError::malformed(
                "connection closed before complete body received",
            ));
        }
    }
    Ok(())
}

async fn read_more<R>(stream: &mut R, buffer: &mut BytesMut) -> Result<usize, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    buffer.reserve(BUFFER_SIZE);
    Ok(stream.read_buf(buffer).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_keeps_path_prefix() {
        let target = UpstreamTarget::parse("http://backend:9000/api/").unwrap();

        assert_eq!(target.authority(), "backend:9000");
        assert_eq!(target.host_header(), "backend:9000");
        assert_eq!(target.url_for("/users"), "http://backend:9000/api/users");
        assert_eq!(target.request_target_for("/users"), "/api/users");
    }

    #[test]
    fn default_port_omitted_from_host_header() {
        let target = UpstreamTarget::parse("http://backend").unwrap();

        assert_eq!(target.authority(), "backend:80");
        assert_eq!(target.host_header(), "backend");
        assert_eq!(target.request_target_for("/"), "/");
    }

    #[tokio::test]
    async fn body_extends_to_eof_without_framing() {
        let mut input: &[u8] = b"HTTP/1.0 200 OK\r\nX-A: 1\r\n\r\nraw body";
        let response = read_http_response(&mut input, &Method::GET).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"raw body");
    }
}
