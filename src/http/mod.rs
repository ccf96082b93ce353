//! HTTP protocol implementation.
//!
//! This module implements the inbound HTTP/1.1 side of the proxy with support
//! for keep-alive connections.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: The main connection handler implementing the request-response state machine
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`headers`**: Ordered header storage with case-insensitive names
//! - **`request`**: HTTP request representation, cookies and keep-alive rules
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//! - **`cors`**: Cross-origin headers attached to every response
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Forward upstream
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! Malformed input skips `Processing`: an error response is written and the
//! connection closes.

pub mod connection;
pub mod cors;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
