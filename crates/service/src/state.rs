use std::sync::Arc;

use sdk::{
    AttestedReleaseKeyHandler, DynKeyHandler, EphemeralKeyHandler, FederatedKmsKeyHandler,
    PolarisSdk,
};

use crate::config::{Config, KeyHandlerKind};

/// Main service state - configuration, crypto capability and upstream client
///
/// Constructed once at boot and cloned per request. Everything in here is
/// read-only after initialization: all per-request cryptographic context
/// (session keys, decrypted headers, target URL) travels with the request,
/// never through shared state.
#[derive(Clone)]
pub struct State {
    config: Arc<Config>,
    sdk: PolarisSdk,
    client: reqwest::Client,
}

impl State {
    pub async fn from_config(config: Config) -> Result<Self, StateSetupError> {
        // 1. Select the key handler backend (exactly one concrete type is
        //    reachable at runtime)
        let key_handler: DynKeyHandler = match config.key_handler {
            KeyHandlerKind::Ephemeral => {
                // keypair generation is CPU-bound, keep it off the runtime
                let handler = tokio::task::spawn_blocking(EphemeralKeyHandler::generate)
                    .await
                    .map_err(|e| StateSetupError::KeyHandler(e.to_string()))?
                    .map_err(|e| StateSetupError::KeyHandler(e.to_string()))?;
                Arc::new(handler)
            }
            KeyHandlerKind::AttestedRelease => {
                let skr_config = sdk::key::AttestedReleaseConfig::from_env()
                    .map_err(|e| StateSetupError::KeyHandler(e.to_string()))?;
                Arc::new(AttestedReleaseKeyHandler::new(skr_config))
            }
            KeyHandlerKind::FederatedKms => {
                let kms_config = sdk::key::FederatedKmsConfig::from_env()
                    .map_err(|e| StateSetupError::KeyHandler(e.to_string()))?;
                Arc::new(FederatedKmsKeyHandler::new(kms_config))
            }
        };
        let sdk = PolarisSdk::new(key_handler);

        // 2. One upstream client for the process; it holds no per-request
        //    state, so it is safe to share across in-flight requests
        let client = reqwest::Client::new();

        tracing::info!(
            "Proxying to workload at {} (input encryption: {}, output encryption: {})",
            config.workload_base_url,
            config.enable_input_encryption,
            config.enable_output_encryption
        );

        Ok(Self {
            config: Arc::new(config),
            sdk,
            client,
        })
    }

    /// Build state around an existing SDK (used by tests)
    pub fn with_sdk(config: Config, sdk: PolarisSdk) -> Self {
        Self {
            config: Arc::new(config),
            sdk,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sdk(&self) -> &PolarisSdk {
        &self.sdk
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("key handler setup failed: {0}")]
    KeyHandler(String),
}
