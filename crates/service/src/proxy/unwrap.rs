//! Unwrap stage: decrypt and decompose an inbound request
//!
//! Produces a [`WorkloadRequest`] or fails with a classified error before any
//! upstream contact. Validation order matters: the response-public-key
//! requirement is checked first so a request that cannot be answered is
//! rejected without touching anything else.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Request};

use sdk::SessionKey;

use crate::http::MAX_BUFFERED_BODY_BYTES;
use crate::state::State;

use super::context::{WorkloadBody, WorkloadRequest};
use super::error::ProxyError;
use super::stream::CipherStream;

/// Hop-by-hop headers never forwarded to the workload
const HOP_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &str,
    label: &'static str,
) -> Result<Option<&'a str>, ProxyError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| ProxyError::InvalidHeader(label)),
        None => Ok(None),
    }
}

fn decode_b64(value: &str, label: &'static str) -> Result<Vec<u8>, ProxyError> {
    BASE64
        .decode(value.trim())
        .map_err(|_| ProxyError::InvalidHeader(label))
}

/// Recover the request session key from the wrapped-key header, if present
///
/// The header carries `base64(wrapped_key):base64(wrapped_iv)`; its presence
/// selects chunked symmetric mode for the request body.
async fn unwrap_session_key(
    state: &State,
    headers: &HeaderMap,
) -> Result<Option<SessionKey>, ProxyError> {
    let Some(value) = header_str(
        headers,
        &state.config().response_wrapped_key_header,
        "wrapped session key",
    )?
    else {
        return Ok(None);
    };

    let (wrapped_key, wrapped_iv) = value
        .split_once(':')
        .ok_or(ProxyError::InvalidHeader("wrapped session key"))?;
    let wrapped_key = decode_b64(wrapped_key, "wrapped session key")?;
    let wrapped_iv = decode_b64(wrapped_iv, "wrapped session key")?;

    let session = state
        .sdk()
        .unwrap_session_key(&wrapped_key, &wrapped_iv)
        .await?;
    Ok(Some(session))
}

/// Run the unwrap stage over an inbound request
pub async fn unwrap_request(
    state: &State,
    request: Request<Body>,
) -> Result<WorkloadRequest, ProxyError> {
    let config = state.config();
    let (parts, body) = request.into_parts();

    // 1. Output encryption requires the caller's response public key; reject
    //    before any other work so no upstream contact is ever attempted
    let response_public_key_raw = header_str(
        &parts.headers,
        &config.response_public_key_header,
        "response public key",
    )?
    .map(str::to_string);

    let response_public_key = if config.enable_output_encryption {
        let raw = response_public_key_raw
            .as_deref()
            .ok_or(ProxyError::MissingResponsePublicKey)?;
        let pem = decode_b64(raw, "response public key")?;
        Some(String::from_utf8(pem).map_err(|_| ProxyError::InvalidHeader("response public key"))?)
    } else {
        None
    };

    // 2. An optional wrapped session key switches body decryption from
    //    whole-body asymmetric to chunked symmetric (amortizes the key
    //    handler cost across a streamed body)
    let session_key = unwrap_session_key(state, &parts.headers).await?;

    let original_path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    if !config.enable_input_encryption {
        tracing::debug!("passing request through unmodified");

        // strip the proxy's own headers plus hop-by-hop headers, forward the
        // rest untouched (raw values, so non-UTF-8 header bytes survive)
        let own_headers = [
            config.url_header.as_str(),
            config.secure_header.as_str(),
            config.response_public_key_header.as_str(),
            config.response_wrapped_key_header.as_str(),
        ];
        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if own_headers.contains(&name.as_str()) || HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        return Ok(WorkloadRequest {
            method: parts.method,
            path: original_path,
            headers,
            body: WorkloadBody::Stream(body.into_data_stream().boxed()),
            response_public_key,
            response_public_key_raw,
        });
    }

    // 3a. Target URL: encrypted in its header, or the request's own path when
    //     absent (per-field decryption is optional, not all-or-nothing)
    let path = match header_str(&parts.headers, &config.url_header, "url")? {
        Some(value) => {
            let ciphertext = decode_b64(value, "url")?;
            let plaintext = state.sdk().decrypt(&ciphertext).await?;
            String::from_utf8(plaintext).map_err(|_| ProxyError::InvalidWorkloadRequest)?
        }
        None => original_path,
    };
    tracing::debug!("decrypted workload path: {}", path);

    // 3b. Forwarded headers: encrypted JSON string map
    let headers = match header_str(&parts.headers, &config.secure_header, "headers")? {
        Some(value) => {
            let ciphertext = decode_b64(value, "headers")?;
            let plaintext = state.sdk().decrypt(&ciphertext).await?;
            let map: HashMap<String, String> =
                serde_json::from_slice(&plaintext).map_err(|_| ProxyError::MalformedHeaders)?;
            let mut headers = HeaderMap::new();
            for (name, value) in map {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|_| ProxyError::MalformedHeaders)?;
                let value =
                    HeaderValue::from_str(&value).map_err(|_| ProxyError::MalformedHeaders)?;
                headers.append(name, value);
            }
            headers
        }
        None => HeaderMap::new(),
    };
    tracing::debug!("decrypted {} workload headers", headers.len());

    // 3c. Body: chunked symmetric mode decrypts lazily as the forward stage
    //     consumes it; buffered mode reads and decrypts the whole envelope
    let body = match session_key {
        Some(session) => {
            WorkloadBody::Stream(CipherStream::new(body.into_data_stream(), &session).boxed())
        }
        None => {
            let raw = to_bytes(body, MAX_BUFFERED_BODY_BYTES)
                .await
                .map_err(|_| ProxyError::BodyRead)?;
            if raw.is_empty() {
                WorkloadBody::Empty
            } else {
                WorkloadBody::Buffered(state.sdk().decrypt(&raw).await?.into())
            }
        }
    };

    Ok(WorkloadRequest {
        method: parts.method,
        path,
        headers,
        body,
        response_public_key,
        response_public_key_raw,
    })
}
