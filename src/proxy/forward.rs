//! Request forwarding
//!
//! Turns one inbound request into one outbound request against the
//! configured upstream and turns the upstream's answer into the response
//! relayed to the caller.

use crate::http::headers::HeaderMap;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder};
use crate::proxy::error::UpstreamError;
use crate::proxy::upstream::{OutboundRequest, UpstreamClient};

/// Response headers never relayed back to the caller.
pub const EXCLUDED_RESPONSE_HEADERS: [&str; 4] = [
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
];

/// Forwards every request to a single upstream.
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    upstream: UpstreamClient,
}

impl ProxyHandler {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Handle one inbound request.
    ///
    /// Never fails: upstream errors become a 502 response, methods that are
    /// not relayed become a 405 response.
    pub async fn handle(&self, request: &Request) -> Response {
        if !request.method.is_forwarded() {
            tracing::debug!(method = %request.method, path = %request.path, "Method not relayed");
            return Response::method_not_allowed(&Method::forwarded_list());
        }

        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Upstream request failed"
                );
                Response::bad_gateway(&e)
            }
        }
    }

    /// Forward a request and relay the upstream response.
    pub async fn forward(&self, request: &Request) -> Result<Response, UpstreamError> {
        let outbound = self.build_outbound(request);

        tracing::debug!(
            method = %request.method,
            url = %outbound.url,
            "Forwarding request"
        );

        let upstream = self.upstream.send(&outbound).await?;

        tracing::info!(
            method = %request.method,
            path = %request.path,
            status = upstream.status.as_u16(),
            "Request forwarded"
        );

        Ok(relay_response(upstream))
    }

    /// Derive the outbound request: same method, literal path appended to
    /// the base URL, headers minus `Host`, body borrowed unchanged.
    pub fn build_outbound<'a>(&self, request: &'a Request) -> OutboundRequest<'a> {
        let target = self.upstream.target();
        OutboundRequest {
            method: &request.method,
            url: target.url_for(&request.path),
            request_target: target.request_target_for(&request.path),
            headers: outbound_headers(&request.headers),
            body: &request.body,
        }
    }
}

/// Inbound headers with every `Host` field removed.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    inbound.without(&["Host"])
}

/// Upstream response with the excluded headers removed; status and body
/// pass through unchanged.
pub fn relay_response(upstream: Response) -> Response {
    ResponseBuilder::new(upstream.status)
        .headers(upstream.headers.without(&EXCLUDED_RESPONSE_HEADERS))
        .body(upstream.body)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::StatusCode;

    #[test]
    fn relay_strips_excluded_headers_in_any_case() {
        let upstream = ResponseBuilder::new(StatusCode::OK)
            .header("CONTENT-LENGTH", "5")
            .header("Content-Encoding", "gzip")
            .header("transfer-encoding", "chunked")
            .header("Connection", "keep-alive")
            .header("X-Test", "1")
            .body(b"hello".to_vec())
            .build();

        let relayed = relay_response(upstream);

        assert_eq!(relayed.headers.len(), 1);
        assert_eq!(relayed.headers.get("x-test"), Some("1"));
        assert_eq!(relayed.body, b"hello");
    }
}
