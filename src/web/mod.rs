use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod handlers;
mod pagination;
pub mod response;

pub use pagination::Pagination;

use crate::AppContext;

/// Serves the API on an already bound listener until `shutdown` fires.
pub async fn serve(ctx: Arc<AppContext>, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = handlers::router(ctx);

    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

pub async fn start_server(ctx: Arc<AppContext>, addr: SocketAddr, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(ctx, listener, shutdown).await
}
