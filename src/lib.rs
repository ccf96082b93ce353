//! Ferry - single-hop HTTP forwarding proxy
//!
//! Every inbound request is relayed to one fixed upstream and the upstream's
//! response is written back, minus a few hop-by-hop headers.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
