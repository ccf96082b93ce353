//! Per-connection state machine for the inbound leg

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::cors::CorsPolicy;
use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::forward::ProxyHandler;

pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    state: ConnectionState,
    handler: Arc<ProxyHandler>,
    cors: Option<CorsPolicy>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

/// Result of waiting for the next request on a connection.
pub enum ReadOutcome {
    Request(Request),
    /// Client closed the connection
    Closed,
    /// The bytes received cannot be a valid request
    Malformed(ParseError),
}

impl Connection {
    pub fn new(stream: TcpStream, handler: Arc<ProxyHandler>, cors: Option<CorsPolicy>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
            cors,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match &mut self.state {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Processing(req),
                        ReadOutcome::Closed => ConnectionState::Closed,
                        ReadOutcome::Malformed(e) => {
                            tracing::debug!(error = %e, "Rejecting malformed request");
                            let response = reject_response(&e);
                            ConnectionState::Writing(ResponseWriter::new(&response, false), false)
                        }
                    };
                }

                ConnectionState::Processing(req) => {
                    let mut response = self.handler.handle(req).await;
                    if let Some(cors) = &self.cors {
                        cors.apply(req, &mut response);
                    }
                    if req.method == Method::HEAD {
                        response.body.clear();
                    }

                    let keep_alive = req.keep_alive();
                    let writer = ResponseWriter::new(&response, keep_alive);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if *keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    return Ok(ReadOutcome::Malformed(e));
                }
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(pending = self.buffer.len(), "Client closed mid-request");
                }
                return Ok(ReadOutcome::Closed);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

fn reject_response(error: &ParseError) -> Response {
    let status = match error {
        ParseError::HeadersTooLarge => StatusCode::HEADER_FIELDS_TOO_LARGE,
        ParseError::BodyTooLarge => StatusCode::CONTENT_TOO_LARGE,
        ParseError::UnsupportedTransferEncoding => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::BAD_REQUEST,
    };
    Response::text(status, format!("{}: {}", status, error))
}
