use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::http::connection::{Connection, Handler};
use crate::server::error_log::ErrorLog;

pub async fn run<H: Handler>(
    listen_addr: &str,
    handler: Arc<H>,
    error_log: Arc<ErrorLog>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on {}", listen_addr);

    serve(listener, handler, error_log).await
}

/// Accepts connections forever, one task per client.
pub async fn serve<H: Handler>(
    listener: TcpListener,
    handler: Arc<H>,
    error_log: Arc<ErrorLog>,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let handler = handler.clone();
        let error_log = error_log.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, handler);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {:#}", peer, e);
                if let Err(log_err) = error_log.record(&e).await {
                    tracing::error!("Could not write error log: {:#}", log_err);
                }
            }
        });
    }
}
