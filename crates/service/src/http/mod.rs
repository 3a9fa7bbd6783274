//! HTTP surface: system endpoints plus the catch-all encryption proxy.

pub mod system;

use axum::routing::get;
use axum::Router;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::proxy;
use crate::state::State;

/// Maximum buffered body size in bytes (500 MB); streamed bodies are unbounded
pub const MAX_BUFFERED_BODY_BYTES: usize = 500 * 1024 * 1024;

/// Build the container router
///
/// System endpoints are served under `/polaris-container`; every other
/// request falls through to the encryption proxy.
pub fn router(state: State) -> Router {
    let trace_layer = TraceLayer::new_for_http();
    let enable_cors = state.config().enable_cors;

    let router = Router::new()
        .route("/polaris-container/health", get(system::health))
        .route("/polaris-container/publicKey", get(system::public_key))
        .route("/polaris-container/logLevel", get(system::log_level))
        .fallback(proxy::handler)
        .with_state(state)
        .layer(trace_layer);

    if enable_cors {
        let cors_layer = CorsLayer::new()
            .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(Any)
            .allow_origin(Any);
        router.layer(cors_layer)
    } else {
        router
    }
}
