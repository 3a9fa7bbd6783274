//! Terminal error handling for the proxy pipeline
//!
//! Every stage propagates a classified [`ProxyError`]; the single terminal
//! mapping here turns the class into a response status and a minimal JSON
//! body. Messages never carry upstream internals or cryptographic detail -
//! those are logged, not returned.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;

use sdk::SdkError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Output encryption is on but the caller supplied no response public key
    #[error("response public key is required for output encryption")]
    MissingResponsePublicKey,
    /// A proxy header was present but not decodable (bad base64, bad format)
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    /// The decrypted forwarded-header payload was not a JSON string map
    #[error("malformed forwarded header payload")]
    MalformedHeaders,
    /// The request body could not be read
    #[error("failed to read request body")]
    BodyRead,
    /// The decrypted target path or a forwarded header was not valid for HTTP
    #[error("invalid workload request")]
    InvalidWorkloadRequest,
    /// Decrypt or unwrap failed (wrong key, corrupted ciphertext)
    #[error("request decryption failed")]
    Crypto,
    /// Response encryption setup failed on our side
    #[error("response encryption failed")]
    ResponseEncryption,
    /// The key backend could not supply key material
    #[error("key material unavailable")]
    KeyAcquisition,
    /// The workload could not be reached or reset the connection
    #[error("upstream request failed")]
    Upstream,
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingResponsePublicKey
            | ProxyError::InvalidHeader(_)
            | ProxyError::MalformedHeaders
            | ProxyError::BodyRead
            | ProxyError::InvalidWorkloadRequest
            | ProxyError::Crypto => StatusCode::BAD_REQUEST,
            ProxyError::ResponseEncryption | ProxyError::KeyAcquisition => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<SdkError> for ProxyError {
    fn from(err: SdkError) -> Self {
        tracing::error!("sdk error: {}", err);
        if err.is_acquisition() {
            ProxyError::KeyAcquisition
        } else {
            ProxyError::Crypto
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!("request rejected: {} ({})", self, status);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
