//! Federated cloud KMS key handler
//!
//! The container's key-wrapping key lives in a cloud KMS and is reachable
//! through workload identity federation: the attestation verifier writes a
//! claims token to a well-known file, the token is exchanged at STS for a
//! federated access token, and that token is used to impersonate a service
//! account with access to the KMS key.
//!
//! Unwrapping is a remote `asymmetricDecrypt` call, so the private key never
//! exists inside the container.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{KeyHandler, KeyHandlerError};

const DEFAULT_STS_TOKEN_URL: &str = "https://sts.googleapis.com/v1/token";
const DEFAULT_KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";
const DEFAULT_CREDENTIAL_SOURCE: &str =
    "/run/container_launcher/attestation_verifier_claims_token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Configuration for the federated KMS key handler
#[derive(Debug, Clone)]
pub struct FederatedKmsConfig {
    /// Project holding the key-wrapping key
    pub project_id: String,
    /// Location of the key ring
    pub location: String,
    /// Key ring id
    pub key_ring_id: String,
    /// Key id of the key-wrapping key
    pub key_id: String,
    /// Audience of the workload identity pool provider
    pub audience: String,
    /// Service account impersonation URL (`:generateAccessToken` endpoint)
    pub service_account_impersonation_url: String,
    /// File the attestation verifier writes the claims token to
    pub credential_source_file: PathBuf,
    /// STS token exchange endpoint
    pub sts_token_url: String,
    /// KMS API base URL
    pub kms_endpoint: String,
}

impl FederatedKmsConfig {
    /// Load the federated KMS configuration from environment variables
    pub fn from_env() -> Result<Self, KeyHandlerError> {
        let require = |name: &str| {
            std::env::var(name)
                .map_err(|_| KeyHandlerError::Config(format!("{name} is required")))
        };

        Ok(Self {
            project_id: require("POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_PROJECT_ID")?,
            location: require("POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_LOCATION")?,
            key_ring_id: require("POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_RING_ID")?,
            key_id: require("POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_ID")?,
            audience: require("POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_AUDIENCE")?,
            service_account_impersonation_url: require(
                "POLARIS_CONTAINER_GOOGLE_FEDERATED_KEY_SERVICE_ACCOUNT",
            )?,
            credential_source_file: std::env::var(
                "POLARIS_CONTAINER_GOOGLE_FEDERATED_CREDENTIAL_SOURCE",
            )
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CREDENTIAL_SOURCE)),
            sts_token_url: DEFAULT_STS_TOKEN_URL.to_string(),
            kms_endpoint: DEFAULT_KMS_ENDPOINT.to_string(),
        })
    }

    /// Fully qualified resource name of the key-wrapping key version
    pub fn key_version_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}/cryptoKeyVersions/latest",
            self.project_id, self.location, self.key_ring_id, self.key_id
        )
    }
}

#[derive(Deserialize)]
struct StsTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImpersonationResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct AsymmetricDecryptResponse {
    plaintext: String,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    pem: String,
}

/// Key handler backed by a cloud KMS asymmetric key behind federated identity
pub struct FederatedKmsKeyHandler {
    config: FederatedKmsConfig,
    client: reqwest::Client,
    // the KMS public key is immutable for the process lifetime
    public_key_pem: OnceCell<String>,
}

impl FederatedKmsKeyHandler {
    pub fn new(config: FederatedKmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            public_key_pem: OnceCell::new(),
        }
    }

    /// Exchange the attestation claims token for a service-account access token
    async fn access_token(&self) -> Result<String, KeyHandlerError> {
        let acquisition = |e: String| KeyHandlerError::Acquisition(e);

        let claims_token = tokio::fs::read_to_string(&self.config.credential_source_file)
            .await
            .map_err(|e| acquisition(format!("claims token unavailable: {e}")))?;

        let sts: StsTokenResponse = self
            .client
            .post(&self.config.sts_token_url)
            .json(&serde_json::json!({
                "grantType": "urn:ietf:params:oauth:grant-type:token-exchange",
                "audience": self.config.audience,
                "scope": CLOUD_PLATFORM_SCOPE,
                "requestedTokenType": "urn:ietf:params:oauth:token-type:access_token",
                "subjectToken": claims_token.trim(),
                "subjectTokenType": "urn:ietf:params:oauth:token-type:jwt",
            }))
            .send()
            .await
            .map_err(|e| acquisition(format!("STS unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| acquisition(format!("STS token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| acquisition(format!("invalid STS response: {e}")))?;

        let impersonation: ImpersonationResponse = self
            .client
            .post(&self.config.service_account_impersonation_url)
            .bearer_auth(sts.access_token)
            .json(&serde_json::json!({ "scope": [CLOUD_PLATFORM_SCOPE] }))
            .send()
            .await
            .map_err(|e| acquisition(format!("impersonation endpoint unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| acquisition(format!("service account impersonation failed: {e}")))?
            .json()
            .await
            .map_err(|e| acquisition(format!("invalid impersonation response: {e}")))?;

        Ok(impersonation.access_token)
    }

    async fn fetch_public_key_pem(&self) -> Result<String, KeyHandlerError> {
        let token = self.access_token().await?;
        let response: PublicKeyResponse = self
            .client
            .get(format!(
                "{}/v1/{}/publicKey",
                self.config.kms_endpoint,
                self.config.key_version_name()
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| KeyHandlerError::PublicKey(format!("KMS unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| KeyHandlerError::PublicKey(format!("KMS getPublicKey failed: {e}")))?
            .json()
            .await
            .map_err(|e| KeyHandlerError::PublicKey(format!("invalid KMS response: {e}")))?;

        Ok(response.pem)
    }
}

#[async_trait]
impl KeyHandler for FederatedKmsKeyHandler {
    async fn init(&self) -> Result<(), KeyHandlerError> {
        self.public_key_pem().await.map(|_| ())
    }

    async fn public_key_pem(&self) -> Result<String, KeyHandlerError> {
        // get_or_try_init is single-flight across concurrent first calls
        self.public_key_pem
            .get_or_try_init(|| self.fetch_public_key_pem())
            .await
            .cloned()
    }

    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyHandlerError> {
        let token = self.access_token().await?;
        let response: AsymmetricDecryptResponse = self
            .client
            .post(format!(
                "{}/v1/{}:asymmetricDecrypt",
                self.config.kms_endpoint,
                self.config.key_version_name()
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({ "ciphertext": BASE64.encode(wrapped) }))
            .send()
            .await
            .map_err(|e| KeyHandlerError::Acquisition(format!("KMS unreachable: {e}")))?
            .error_for_status()
            .map_err(|_| KeyHandlerError::Unwrap)?
            .json()
            .await
            .map_err(|_| KeyHandlerError::Unwrap)?;

        BASE64
            .decode(response.plaintext)
            .map_err(|_| KeyHandlerError::Unwrap)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> FederatedKmsConfig {
        FederatedKmsConfig {
            project_id: "proj".into(),
            location: "global".into(),
            key_ring_id: "ring".into(),
            key_id: "key".into(),
            audience: "//iam.googleapis.com/projects/1/locations/global/pools/p/providers/x"
                .into(),
            service_account_impersonation_url: "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/sa@proj.iam.gserviceaccount.com:generateAccessToken".into(),
            credential_source_file: PathBuf::from(DEFAULT_CREDENTIAL_SOURCE),
            sts_token_url: DEFAULT_STS_TOKEN_URL.to_string(),
            kms_endpoint: DEFAULT_KMS_ENDPOINT.to_string(),
        }
    }

    #[test]
    fn test_key_version_name() {
        assert_eq!(
            config().key_version_name(),
            "projects/proj/locations/global/keyRings/ring/cryptoKeys/key/cryptoKeyVersions/latest"
        );
    }
}
