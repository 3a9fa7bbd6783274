//! Acquisition behavior of the attested-release key handler
//!
//! Boots a mock key-release sidecar on a loopback port and drives the handler
//! against it: the retry bound, single-flight acquisition under concurrent
//! first calls, and the one-shot re-release after a vault-side key rotation.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use url::Url;

use sdk::crypto::{self, RSA_KEY_BITS};
use sdk::key::{AttestedReleaseConfig, AttestedReleaseKeyHandler};
use sdk::KeyHandler;

/// Mock key-release sidecar: fails the first `fail_first` release calls, then
/// serves whatever JWK it currently holds
#[derive(Clone)]
struct Sidecar {
    hits: Arc<AtomicUsize>,
    fail_first: usize,
    jwk: Arc<Mutex<String>>,
}

impl Sidecar {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Simulate a vault-side key rotation
    fn rotate(&self, jwk: String) {
        *self.jwk.lock().unwrap() = jwk;
    }
}

async fn release(State(sidecar): State<Sidecar>) -> Result<Json<serde_json::Value>, StatusCode> {
    let hit = sidecar.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= sidecar.fail_first {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let key = sidecar.jwk.lock().unwrap().clone();
    Ok(Json(serde_json::json!({ "key": key })))
}

async fn spawn_sidecar(fail_first: usize, jwk: String) -> (Sidecar, Url) {
    let sidecar = Sidecar {
        hits: Arc::new(AtomicUsize::new(0)),
        fail_first,
        jwk: Arc::new(Mutex::new(jwk)),
    };
    let router = Router::new()
        .route("/key/release", post(release))
        .with_state(sidecar.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let endpoint = Url::parse(&format!("http://{}/key/release", addr)).unwrap();
    (sidecar, endpoint)
}

fn config(release_endpoint: Url, max_retries: u32) -> AttestedReleaseConfig {
    AttestedReleaseConfig {
        release_endpoint,
        maa_endpoint: "https://maa.example".to_string(),
        akv_endpoint: "https://vault.example".to_string(),
        kid: "container-key".to_string(),
        access_token: None,
        max_retries,
        // no delay between attempts, the tests only count them
        retry_interval: Duration::from_millis(0),
    }
}

fn generate_key() -> RsaPrivateKey {
    let mut rng = rand::rngs::OsRng;
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap()
}

fn to_jwk(private_key: &RsaPrivateKey) -> String {
    let primes = private_key.primes();
    serde_json::json!({
        "kty": "RSA",
        "n": URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        "d": URL_SAFE_NO_PAD.encode(private_key.d().to_bytes_be()),
        "p": URL_SAFE_NO_PAD.encode(primes[0].to_bytes_be()),
        "q": URL_SAFE_NO_PAD.encode(primes[1].to_bytes_be()),
    })
    .to_string()
}

#[tokio::test]
async fn test_release_retries_until_success() {
    let key = generate_key();
    let (sidecar, endpoint) = spawn_sidecar(2, to_jwk(&key)).await;
    let handler = AttestedReleaseKeyHandler::new(config(endpoint, 5));

    handler.init().await.unwrap();
    assert_eq!(sidecar.hits(), 3);

    // material is cached afterwards, no further release calls
    handler.public_key_pem().await.unwrap();
    let wrapped = crypto::wrap(&key.to_public_key(), b"session material").unwrap();
    assert_eq!(
        handler.unwrap_key(&wrapped).await.unwrap(),
        b"session material"
    );
    assert_eq!(sidecar.hits(), 3);
}

#[tokio::test]
async fn test_release_fails_after_retry_bound() {
    let key = generate_key();
    let (sidecar, endpoint) = spawn_sidecar(usize::MAX, to_jwk(&key)).await;
    let handler = AttestedReleaseKeyHandler::new(config(endpoint, 3));

    assert!(handler.init().await.is_err());
    assert_eq!(sidecar.hits(), 3);
}

#[tokio::test]
async fn test_concurrent_first_calls_release_once() {
    let key = generate_key();
    let (sidecar, endpoint) = spawn_sidecar(0, to_jwk(&key)).await;
    let handler = Arc::new(AttestedReleaseKeyHandler::new(config(endpoint, 5)));

    let wrapped = crypto::wrap(&key.to_public_key(), b"session material").unwrap();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let handler = handler.clone();
            let wrapped = wrapped.clone();
            tokio::spawn(async move { handler.unwrap_key(&wrapped).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), b"session material");
    }

    // acquisition is single-flight: eight concurrent first calls, one release
    assert_eq!(sidecar.hits(), 1);
}

#[tokio::test]
async fn test_rotated_key_triggers_single_rerelease() {
    let old_key = generate_key();
    let new_key = generate_key();
    let (sidecar, endpoint) = spawn_sidecar(0, to_jwk(&old_key)).await;
    let handler = AttestedReleaseKeyHandler::new(config(endpoint, 5));

    handler.init().await.unwrap();
    assert_eq!(sidecar.hits(), 1);

    // the vault rotates; ciphertext wrapped under the new key must still
    // unwrap, at the cost of exactly one re-release
    sidecar.rotate(to_jwk(&new_key));
    let wrapped = crypto::wrap(&new_key.to_public_key(), b"rotated material").unwrap();
    assert_eq!(
        handler.unwrap_key(&wrapped).await.unwrap(),
        b"rotated material"
    );
    assert_eq!(sidecar.hits(), 2);

    // garbage still fails, after exactly one more re-release
    assert!(handler.unwrap_key(&[0u8; 64]).await.is_err());
    assert_eq!(sidecar.hits(), 3);
}
