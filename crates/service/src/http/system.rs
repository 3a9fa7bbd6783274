//! System endpoints: health, public key and log level.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::proxy::ProxyError;
use crate::state::State as ServiceState;

/// `GET /polaris-container/health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// `GET /polaris-container/publicKey`
///
/// Lazily triggers key acquisition on backends that have not initialized yet.
pub async fn public_key(
    State(state): State<ServiceState>,
) -> Result<Json<Value>, ProxyError> {
    let public_key = state.sdk().public_key().await?;
    Ok(Json(json!({ "publicKey": public_key })))
}

/// `GET /polaris-container/logLevel`
pub async fn log_level(State(state): State<ServiceState>) -> Json<Value> {
    Json(json!({ "level": state.config().log_level.to_string().to_lowercase() }))
}
