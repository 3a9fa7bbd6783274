//! Pluggable key handlers supplying the container's key material
//!
//! A [`KeyHandler`] abstracts how and where the container's private key is
//! protected. Three variants exist, selected once at startup:
//!
//! - [`EphemeralKeyHandler`]: keypair generated at startup, in memory only
//! - [`AttestedReleaseKeyHandler`]: key released by a local attestation
//!   sidecar, with bounded retries
//! - [`FederatedKmsKeyHandler`]: unwrap performed remotely by a cloud KMS via
//!   a federated identity token; the private key never exists locally
//!
//! Every operation treats "key not yet available" as a trigger to attempt
//! acquisition rather than a hard failure, and acquisition is single-flight so
//! concurrent first requests do not cause duplicate key-release calls.

use std::sync::Arc;

use async_trait::async_trait;

mod attested;
mod ephemeral;
mod federated;

pub use attested::{AttestedReleaseConfig, AttestedReleaseKeyHandler};
pub use ephemeral::EphemeralKeyHandler;
pub use federated::{FederatedKmsConfig, FederatedKmsKeyHandler};

/// Errors that can occur in key handler operations
#[derive(Debug, thiserror::Error)]
pub enum KeyHandlerError {
    #[error("key acquisition failed: {0}")]
    Acquisition(String),
    #[error("key unwrap failed")]
    Unwrap,
    #[error("public key unavailable: {0}")]
    PublicKey(String),
    #[error("key handler misconfigured: {0}")]
    Config(String),
}

/// The three-operation key handler contract
///
/// Implementations own the container-wide key material. The read path after
/// initialization is lock-free for callers; initialization itself must be
/// idempotent.
#[async_trait]
pub trait KeyHandler: Send + Sync {
    /// Acquire key material eagerly
    ///
    /// Calling this is optional: [`KeyHandler::public_key_pem`] and
    /// [`KeyHandler::unwrap_key`] acquire lazily on first use.
    async fn init(&self) -> Result<(), KeyHandlerError>;

    /// The container's public key as PKCS#8 PEM
    async fn public_key_pem(&self) -> Result<String, KeyHandlerError>;

    /// Unwrap RSA-OAEP wrapped bytes with the container's private key
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyHandlerError>;
}

/// Shared handle to a key handler, selected once from configuration
pub type DynKeyHandler = Arc<dyn KeyHandler>;
