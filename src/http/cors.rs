//! Permissive cross-origin policy.
//!
//! Every response leaving the proxy is decorated so browser clients on any
//! origin can call it. Preflight requests are not short-circuited here; they
//! are relayed like any other OPTIONS request and decorated on the way out.

use crate::http::request::{Method, Request};
use crate::http::response::Response;

pub const ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
pub const ALLOW_METHODS: &str = "Access-Control-Allow-Methods";
pub const ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";
pub const REQUEST_METHOD: &str = "Access-Control-Request-Method";
pub const REQUEST_HEADERS: &str = "Access-Control-Request-Headers";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_methods: String,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allowed_methods: Method::forwarded_list(),
        }
    }
}

impl CorsPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds cross-origin headers for `request` to `response`.
    ///
    /// Same-named headers already on the response are replaced.
    pub fn apply(&self, request: &Request, response: &mut Response) {
        match request.header("Origin") {
            Some(origin) => {
                response.headers.insert(ALLOW_ORIGIN, origin);
                if !vary_mentions_origin(response) {
                    response.headers.append("Vary", "Origin");
                }
            }
            None => response.headers.insert(ALLOW_ORIGIN, "*"),
        }

        if is_preflight(request) {
            response.headers.insert(ALLOW_METHODS, self.allowed_methods.as_str());
            if let Some(requested) = request.header(REQUEST_HEADERS) {
                response.headers.insert(ALLOW_HEADERS, requested);
            }
        }
    }
}

/// An OPTIONS request announcing the method it intends to use.
pub fn is_preflight(request: &Request) -> bool {
    request.method == Method::OPTIONS && request.header(REQUEST_METHOD).is_some()
}

fn vary_mentions_origin(response: &Response) -> bool {
    response
        .headers
        .get_all("Vary")
        .flat_map(|v| v.split(','))
        .any(|v| v.trim() == "*" || v.trim().eq_ignore_ascii_case("Origin"))
}
