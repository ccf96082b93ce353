//! Accept loop that hands each client socket to a `Connection`

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::cors::CorsPolicy;
use crate::proxy::forward::ProxyHandler;
use crate::proxy::upstream::UpstreamClient;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener, cfg).await
}

/// Accept connections on an already bound listener until an accept fails.
pub async fn serve(listener: TcpListener, cfg: &Config) -> anyhow::Result<()> {
    let upstream = UpstreamClient::new(cfg.upstream_target()?, cfg.upstream_timeout);
    let handler = Arc::new(ProxyHandler::new(upstream));
    let cors = cfg.cors.then(CorsPolicy::new);

    info!(upstream = %cfg.target, cors = cfg.cors, "Forwarding all requests");

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let handler = Arc::clone(&handler);
        let cors = cors.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, handler, cors);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
