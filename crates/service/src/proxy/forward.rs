//! Forward stage: send the unwrapped request to the workload and re-encrypt
//! the response
//!
//! The wrapped response session key is committed to a response header before
//! the first body byte is produced, so streamed responses can be decrypted by
//! the caller as chunks arrive.

use axum::body::Body;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use url::Url;

use crate::http::MAX_BUFFERED_BODY_BYTES;
use crate::state::State;

use super::context::{WorkloadBody, WorkloadRequest};
use super::error::ProxyError;
use super::stream::CipherStream;

/// Request headers managed by the HTTP client itself, never forwarded as-is
const SKIP_REQUEST_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

/// Upstream response headers describing framing that no longer applies once
/// the body has been re-encrypted or re-streamed
const SKIP_RESPONSE_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Join the workload base URL with a request path, collapsing duplicate
/// slashes so decrypted paths with or without a leading slash resolve the same
fn normalize_target(base: &Url, path: &str) -> String {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    let mut collapsed = String::with_capacity(joined.len());
    let mut prev_slash = false;
    for c in joined.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        collapsed.push(c);
    }

    // collapsing also folded the scheme separator, restore it
    let mut target = collapsed.replacen(":/", "://", 1);
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Forward a [`WorkloadRequest`] and build the (optionally encrypted) response
pub async fn forward(state: &State, workload: WorkloadRequest) -> Result<Response, ProxyError> {
    let config = state.config();
    let target = normalize_target(&config.workload_base_url, &workload.path);
    tracing::debug!("forwarding {} {}", workload.method, target);

    // 1. Build the upstream request from the unwrapped parts
    let mut builder = state.client().request(workload.method, &target);
    for (name, value) in workload.headers.iter() {
        // header names are already lowercase in a HeaderMap
        if SKIP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    // some workloads encrypt their own payloads with the caller's key, so the
    // raw header value travels through untouched
    if let Some(raw) = &workload.response_public_key_raw {
        builder = builder.header(config.response_public_key_header.as_str(), raw.as_str());
    }
    builder = match workload.body {
        WorkloadBody::Empty => builder,
        WorkloadBody::Buffered(bytes) => builder.body(bytes),
        WorkloadBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
    };

    // 2. Send; connection failures surface as a bad gateway, while requests
    //    the client refuses to even build are the caller's fault
    let upstream = builder.send().await.map_err(|err| {
        tracing::error!("workload request failed: {}", err);
        if err.is_builder() {
            ProxyError::InvalidWorkloadRequest
        } else {
            ProxyError::Upstream
        }
    })?;

    // 3. Mirror status and headers, minus framing the re-encryption changes
    let mut response = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if SKIP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        response = response.header(name, value);
    }

    if !config.enable_output_encryption {
        tracing::debug!("passing response through unmodified");
        let body = Body::from_stream(upstream.bytes_stream());
        return response
            .body(body)
            .map_err(|_| ProxyError::ResponseEncryption);
    }

    // 4. Fresh session key per response, wrapped under the caller's public
    //    key and committed to a header before any body bytes flow
    let pem = workload
        .response_public_key
        .as_deref()
        .ok_or(ProxyError::MissingResponsePublicKey)?;
    let session = state.sdk().create_session_key();
    let (wrapped_key, wrapped_iv) = state.sdk().wrap_session_key(&session, pem).map_err(|err| {
        tracing::error!("failed to wrap response session key: {}", err);
        if err.is_acquisition() {
            ProxyError::KeyAcquisition
        } else {
            ProxyError::ResponseEncryption
        }
    })?;
    response = response.header(
        config.response_wrapped_key_header.as_str(),
        format!(
            "{}:{}",
            BASE64.encode(&wrapped_key),
            BASE64.encode(&wrapped_iv)
        ),
    );

    // 5. Known-length responses are encrypted in one shot; everything else
    //    (SSE, chunked generation) is encrypted chunk-by-chunk as it arrives
    let body = match upstream.content_length() {
        Some(len) if len <= MAX_BUFFERED_BODY_BYTES as u64 => {
            let plaintext = upstream.bytes().await.map_err(|err| {
                tracing::error!("failed to read workload response: {}", err);
                ProxyError::Upstream
            })?;
            Body::from(session.encrypt(&plaintext))
        }
        _ => Body::from_stream(CipherStream::new(upstream.bytes_stream().boxed(), &session)),
    };

    response
        .body(body)
        .map_err(|_| ProxyError::ResponseEncryption)
}

#[cfg(test)]
mod test {
    use super::*;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn test_normalize_target_joins_path_and_query() {
        assert_eq!(
            normalize_target(&base("http://localhost:8000"), "/hello?world=1"),
            "http://localhost:8000/hello?world=1"
        );
    }

    #[test]
    fn test_normalize_target_without_leading_slash() {
        assert_eq!(
            normalize_target(&base("http://localhost:8000"), "hello"),
            "http://localhost:8000/hello"
        );
    }

    #[test]
    fn test_normalize_target_collapses_duplicate_slashes() {
        assert_eq!(
            normalize_target(&base("http://wl:3001/api/"), "//v1//chat"),
            "http://wl:3001/api/v1/chat"
        );
    }

    #[test]
    fn test_normalize_target_preserves_query() {
        // query values are opaque, duplicate slashes in them survive
        assert_eq!(
            normalize_target(&base("https://wl"), "/redirect?to=http://a//b"),
            "https://wl/redirect?to=http://a//b"
        );
    }
}
