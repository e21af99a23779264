pub mod api;
pub mod config;
pub mod error;
pub mod state;

use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

pub use api::create_router;
pub use state::AppState;

use config::ServerConfig;

/// Bind the configured address. The host may be a name, an IPv4 address, or
/// a bare IPv6 address such as `::`.
pub async fn bind(server: &ServerConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind((server.host.as_str(), server.port)).await
}

/// Serve the router on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
