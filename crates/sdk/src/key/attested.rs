//! Attested key release via a local secure-key-release sidecar
//!
//! In a confidential VM the container's private key is protected by a key
//! vault and only released to attested workloads. A local sidecar performs
//! the attestation dance; this handler POSTs it a release request and parses
//! the released private key (an RSA JWK).
//!
//! The sidecar may not be ready when the container boots, so acquisition
//! retries a bounded number of times with a fixed delay, and every operation
//! re-attempts acquisition if key material is still absent. A stale cached
//! key (vault-side rotation) self-heals: one failed unwrap triggers a single
//! re-release before the error is surfaced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::{BigUint, RsaPrivateKey};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::crypto;

use super::{KeyHandler, KeyHandlerError};

const DEFAULT_RELEASE_ENDPOINT: &str = "http://localhost:8080/key/release";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the attested-release sidecar
#[derive(Debug, Clone)]
pub struct AttestedReleaseConfig {
    /// Sidecar key release endpoint
    pub release_endpoint: Url,
    /// Attestation service endpoint, passed through to the sidecar
    pub maa_endpoint: String,
    /// Key vault endpoint holding the protected key
    pub akv_endpoint: String,
    /// Identifier of the protected key
    pub kid: String,
    /// Optional pre-acquired vault access token
    pub access_token: Option<String>,
    /// Release attempts before acquisition fails for good
    pub max_retries: u32,
    /// Fixed delay between release attempts
    pub retry_interval: Duration,
}

impl AttestedReleaseConfig {
    /// Load the sidecar configuration from environment variables
    ///
    /// `MAA_ENDPOINT`, `AKV_ENDPOINT` and `KID` are required.
    pub fn from_env() -> Result<Self, KeyHandlerError> {
        let require = |name: &str| {
            std::env::var(name)
                .map_err(|_| KeyHandlerError::Config(format!("{name} is required")))
        };

        let release_endpoint = std::env::var("POLARIS_CONTAINER_SKR_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_RELEASE_ENDPOINT.to_string());
        let release_endpoint = Url::parse(&release_endpoint)
            .map_err(|e| KeyHandlerError::Config(format!("invalid release endpoint: {e}")))?;

        let max_retries = std::env::var("POLARIS_CONTAINER_SKR_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_interval = std::env::var("POLARIS_CONTAINER_SKR_RETRY_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_INTERVAL);

        Ok(Self {
            release_endpoint,
            maa_endpoint: require("MAA_ENDPOINT")?,
            akv_endpoint: require("AKV_ENDPOINT")?,
            kid: require("KID")?,
            access_token: std::env::var("ACCESS_TOKEN").ok(),
            max_retries,
            retry_interval,
        })
    }
}

/// Key material released by the sidecar
struct ReleasedKey {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

/// Key handler backed by an attestation sidecar key release
pub struct AttestedReleaseKeyHandler {
    config: AttestedReleaseConfig,
    client: reqwest::Client,
    material: RwLock<Option<Arc<ReleasedKey>>>,
    // serializes acquisition so concurrent first requests trigger one release
    acquire: Mutex<()>,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    // the released key is a JSON-encoded JWK string
    key: String,
}

/// The subset of an RSA private JWK needed to rebuild the key
#[derive(Deserialize)]
struct RsaJwk {
    kty: String,
    n: String,
    e: String,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
}

fn jwk_field(value: &str) -> Result<BigUint, KeyHandlerError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| KeyHandlerError::Acquisition(format!("invalid JWK field encoding: {e}")))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Rebuild an RSA private key from a released JWK
fn private_key_from_jwk(jwk_json: &str) -> Result<RsaPrivateKey, KeyHandlerError> {
    let jwk: RsaJwk = serde_json::from_str(jwk_json)
        .map_err(|e| KeyHandlerError::Acquisition(format!("invalid released JWK: {e}")))?;
    if jwk.kty != "RSA" {
        return Err(KeyHandlerError::Acquisition(format!(
            "unsupported released key type: {}",
            jwk.kty
        )));
    }
    let missing =
        || KeyHandlerError::Acquisition("released JWK is not a private key".to_string());

    let n = jwk_field(&jwk.n)?;
    let e = jwk_field(&jwk.e)?;
    let d = jwk_field(&jwk.d.ok_or_else(missing)?)?;
    let p = jwk_field(&jwk.p.ok_or_else(missing)?)?;
    let q = jwk_field(&jwk.q.ok_or_else(missing)?)?;

    RsaPrivateKey::from_components(n, e, d, vec![p, q])
        .map_err(|e| KeyHandlerError::Acquisition(format!("invalid released key: {e}")))
}

impl AttestedReleaseKeyHandler {
    pub fn new(config: AttestedReleaseConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            material: RwLock::new(None),
            acquire: Mutex::new(()),
        }
    }

    /// One release attempt against the sidecar
    async fn release_once(&self) -> Result<Arc<ReleasedKey>, KeyHandlerError> {
        let body = serde_json::json!({
            "maa_endpoint": self.config.maa_endpoint,
            "akv_endpoint": self.config.akv_endpoint,
            "kid": self.config.kid,
            "access_token": self.config.access_token,
        });

        let response = self
            .client
            .post(self.config.release_endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyHandlerError::Acquisition(format!("sidecar unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| KeyHandlerError::Acquisition(format!("sidecar refused release: {e}")))?
            .json::<ReleaseResponse>()
            .await
            .map_err(|e| KeyHandlerError::Acquisition(format!("invalid sidecar response: {e}")))?;

        let private_key = private_key_from_jwk(&response.key)?;
        let public_key_pem = crypto::public_key_to_pem(&private_key.to_public_key())
            .map_err(|e| KeyHandlerError::PublicKey(e.to_string()))?;
        Ok(Arc::new(ReleasedKey {
            private_key,
            public_key_pem,
        }))
    }

    /// Acquire key material, retrying up to the configured bound
    ///
    /// `force` bypasses the cache (used when a cached key turned stale).
    async fn acquire(&self, force: bool) -> Result<Arc<ReleasedKey>, KeyHandlerError> {
        let _guard = self.acquire.lock().await;

        // another caller may have finished acquisition while we waited
        if !force {
            if let Some(material) = self.material.read().await.as_ref() {
                return Ok(material.clone());
            }
        }

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            match self.release_once().await {
                Ok(material) => {
                    *self.material.write().await = Some(material.clone());
                    tracing::info!("attested key release succeeded on attempt {}", attempt);
                    return Ok(material);
                }
                Err(e) => {
                    tracing::warn!(
                        "attested key release attempt {}/{} failed: {}",
                        attempt,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_interval).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| KeyHandlerError::Acquisition("no release attempts made".into())))
    }

    async fn material(&self) -> Result<Arc<ReleasedKey>, KeyHandlerError> {
        if let Some(material) = self.material.read().await.as_ref() {
            return Ok(material.clone());
        }
        self.acquire(false).await
    }
}

#[async_trait]
impl KeyHandler for AttestedReleaseKeyHandler {
    async fn init(&self) -> Result<(), KeyHandlerError> {
        self.acquire(false).await.map(|_| ())
    }

    async fn public_key_pem(&self) -> Result<String, KeyHandlerError> {
        Ok(self.material().await?.public_key_pem.clone())
    }

    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyHandlerError> {
        let material = self.material().await?;
        match crypto::unwrap(&material.private_key, wrapped) {
            Ok(raw) => Ok(raw),
            Err(_) => {
                // the cached key may be stale after a vault-side rotation;
                // re-release once before giving up
                tracing::warn!("unwrap failed with cached key, re-acquiring");
                let material = self.acquire(true).await?;
                crypto::unwrap(&material.private_key, wrapped)
                    .map_err(|_| KeyHandlerError::Unwrap)
            }
        }
    }
}
