//! The cryptographic capability handed to the proxy pipeline
//!
//! [`PolarisSdk`] exposes the operations the proxy needs (encrypt, decrypt,
//! wrap, unwrap, session keys) while delegating every private-key operation
//! to the configured [`KeyHandler`]. The SDK itself is stateless and cheap to
//! clone; all per-request cryptographic context lives with the request.

use std::sync::Arc;

use crate::crypto::{self, EnvelopeError, KeyError, SessionKey, SessionKeyError};
use crate::key::{DynKeyHandler, KeyHandler, KeyHandlerError};

/// Errors surfaced by SDK operations
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Session(#[from] SessionKeyError),
    #[error(transparent)]
    Handler(#[from] KeyHandlerError),
}

impl SdkError {
    /// Whether the failure happened while acquiring key material (as opposed
    /// to a cryptographic failure on request data)
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            SdkError::Handler(
                KeyHandlerError::Acquisition(_)
                    | KeyHandlerError::PublicKey(_)
                    | KeyHandlerError::Config(_)
            )
        )
    }
}

/// Crypto capability bound to a key handler
#[derive(Clone)]
pub struct PolarisSdk {
    key_handler: DynKeyHandler,
}

impl PolarisSdk {
    pub fn new(key_handler: DynKeyHandler) -> Self {
        Self { key_handler }
    }

    pub fn from_handler<H: KeyHandler + 'static>(handler: H) -> Self {
        Self::new(Arc::new(handler))
    }

    /// Eagerly acquire the container's key material
    pub async fn init(&self) -> Result<(), SdkError> {
        Ok(self.key_handler.init().await?)
    }

    /// The container's public key as PEM
    pub async fn public_key(&self) -> Result<String, SdkError> {
        Ok(self.key_handler.public_key_pem().await?)
    }

    /// Encrypt plaintext into a hybrid envelope for a recipient public key
    pub fn encrypt(&self, plaintext: &[u8], recipient_pem: &str) -> Result<Vec<u8>, SdkError> {
        let recipient = crypto::parse_public_key_pem(recipient_pem)?;
        Ok(crypto::seal(&recipient, plaintext)?)
    }

    /// Decrypt a hybrid envelope addressed to the container
    ///
    /// The enveloped session key is unwrapped by the key handler, so this
    /// works for handlers that never materialize a private key locally.
    pub async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SdkError> {
        let (wrapped, sealed) = crypto::split(ciphertext)?;
        let raw = self.key_handler.unwrap_key(wrapped).await?;
        let session = SessionKey::from_bytes(&raw)?;
        Ok(crypto::open(&session, sealed)?)
    }

    /// Wrap raw key bytes under a recipient public key
    pub fn wrap_key(&self, raw: &[u8], recipient_pem: &str) -> Result<Vec<u8>, SdkError> {
        let recipient = crypto::parse_public_key_pem(recipient_pem)?;
        Ok(crypto::wrap(&recipient, raw)?)
    }

    /// Unwrap wrapped key bytes with the container's private key
    pub async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, SdkError> {
        Ok(self.key_handler.unwrap_key(wrapped).await?)
    }

    /// Generate a fresh random session key
    pub fn create_session_key(&self) -> SessionKey {
        SessionKey::generate()
    }

    /// Wrap a session key for a recipient, producing the wire pair
    /// `(wrapped_key, wrapped_iv)`
    pub fn wrap_session_key(
        &self,
        session: &SessionKey,
        recipient_pem: &str,
    ) -> Result<(Vec<u8>, Vec<u8>), SdkError> {
        let recipient = crypto::parse_public_key_pem(recipient_pem)?;
        let wrapped_key = crypto::wrap(&recipient, session.key())?;
        let wrapped_iv = crypto::wrap(&recipient, session.iv())?;
        Ok((wrapped_key, wrapped_iv))
    }

    /// Recover a session key from the wire pair of wrapped key and IV
    pub async fn unwrap_session_key(
        &self,
        wrapped_key: &[u8],
        wrapped_iv: &[u8],
    ) -> Result<SessionKey, SdkError> {
        let key = self.key_handler.unwrap_key(wrapped_key).await?;
        let iv = self.key_handler.unwrap_key(wrapped_iv).await?;
        Ok(SessionKey::from_parts(&key, &iv)?)
    }
}
