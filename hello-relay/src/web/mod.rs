//! Web server module exposing the relay endpoints.
//!
//! - `/send`: publish a timestamped greeting to the `hello` queue
//! - `/consume`: take one already-buffered message, if any
//! - `/health`: broker channel status
//!
//! Both relay endpoints accept any HTTP method.

pub mod handlers;

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{consume, health, send, AppState, HealthResponse};

/// Build the application router.
///
/// Handlers read the caller's address through `ConnectInfo`, so the router
/// must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/send", any(send))
        .route("/consume", any(consume))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
