//! Failures of the outbound leg.
//!
//! Every variant ends the same way at the handler boundary: a 502 response
//! whose body carries the `Display` text below.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The target URL could not be turned into a connectable address.
    #[error("invalid upstream target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// TCP connect failed (refused, unreachable, DNS failure).
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The exchange did not finish within the configured timeout.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// Reading or writing an established connection failed.
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream answered with something that is not a valid HTTP/1.x response.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

impl UpstreamError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        UpstreamError::MalformedResponse(msg.into())
    }
}
