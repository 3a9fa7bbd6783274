//! Request-scoped context flowing between the pipeline stages
//!
//! A [`WorkloadRequest`] is built once per request by the unwrap stage and
//! consumed by the forward stage. It is owned exclusively by that request's
//! processing lifetime - nothing in it is shared across requests.

use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, Method};

/// The request body in its decrypted/normalized form
pub enum WorkloadBody {
    /// No body (e.g. GET)
    Empty,
    /// Fully decrypted in memory (buffered whole-body mode)
    Buffered(Bytes),
    /// Lazy chunk sequence, decrypted incrementally as the upstream client
    /// consumes it (streaming mode and passthrough)
    Stream(BoxStream<'static, Result<Bytes, axum::Error>>),
}

impl std::fmt::Debug for WorkloadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadBody::Empty => f.write_str("Empty"),
            WorkloadBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            WorkloadBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// The decrypted, decomposed form of an inbound request
#[derive(Debug)]
pub struct WorkloadRequest {
    /// Original HTTP method, preserved upstream
    pub method: Method,
    /// Path + query to forward to the workload
    pub path: String,
    /// Decrypted (or passthrough) headers to forward; raw values are kept so
    /// non-UTF-8 header bytes survive passthrough unchanged
    pub headers: HeaderMap,
    /// Request body, decrypted or passthrough
    pub body: WorkloadBody,
    /// Caller's response public key, PEM-decoded
    pub response_public_key: Option<String>,
    /// Raw base64 header value of the response public key, forwarded upstream
    /// unchanged (some workloads encrypt their own responses with it)
    pub response_public_key_raw: Option<String>,
}
