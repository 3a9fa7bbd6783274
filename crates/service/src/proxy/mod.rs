//! The encrypting reverse proxy pipeline
//!
//! Two stages process every proxied request:
//!
//!   1. **unwrap** - validate, decrypt and decompose the inbound request into
//!      a [`WorkloadRequest`]
//!   2. **forward** - send it to the co-located workload and re-encrypt the
//!      response under a fresh session key
//!
//! Both stages are fail-closed: any classified [`ProxyError`] short-circuits
//! to the terminal error mapping and nothing is forwarded or returned in the
//! clear. Each request's cryptographic context lives in its `WorkloadRequest`
//! and is dropped with it.

pub mod context;
pub mod error;
pub mod forward;
pub mod stream;
pub mod unwrap;

pub use context::{WorkloadBody, WorkloadRequest};
pub use error::ProxyError;
pub use stream::CipherStream;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};

use crate::state::State as ServiceState;

/// Catch-all proxy handler; every path not claimed by a system endpoint
/// lands here
pub async fn handler(State(state): State<ServiceState>, request: Request) -> Response {
    match run(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn run(state: &ServiceState, request: Request) -> Result<Response, ProxyError> {
    let workload = unwrap::unwrap_request(state, request).await?;
    forward::forward(state, workload).await
}
