//! Forwarding proxy functionality
//!
//! This module implements the core forwarding logic: building the outbound
//! request, talking to the upstream, and mapping failures to 502.

pub mod error;
pub mod forward;
pub mod upstream;

pub use error::UpstreamError;
pub use forward::ProxyHandler;
pub use upstream::{UpstreamClient, UpstreamTarget};
