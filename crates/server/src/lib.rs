//! Contested realtime relay.
//!
//! A small axum server speaking the realtime protocol: token handshake,
//! channel pub/sub over WebSockets, and an HTTP route that pushes
//! notifications onto per-user channels.

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod channels;
pub mod config;
pub mod error;
pub mod notify;
pub mod state;
pub mod ws;

pub use auth::{StaticTokens, TokenVerifier};
pub use config::ServerConfig;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/notify", post(notify::notify))
        .fallback(error::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the relay on `listener` until the future is dropped or `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
