use async_trait::async_trait;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::{self, RSA_KEY_BITS};

use super::{KeyHandler, KeyHandlerError};

/// Key handler backed by an in-memory keypair generated at startup
///
/// The private key lives only in process memory and is lost on restart. This
/// is the default backend and the one used by tests: no external key
/// infrastructure is required, at the cost of a fresh identity per process.
pub struct EphemeralKeyHandler {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl EphemeralKeyHandler {
    /// Generate a fresh RSA keypair
    ///
    /// Key generation is CPU-bound; call from a blocking context at startup
    /// (e.g. `tokio::task::spawn_blocking`).
    pub fn generate() -> Result<Self, KeyHandlerError> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| KeyHandlerError::Acquisition(format!("keypair generation: {e}")))?;
        Self::from_private_key(private_key)
    }

    /// Build a handler around an existing private key
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, KeyHandlerError> {
        let public_key: RsaPublicKey = private_key.to_public_key();
        let public_key_pem = crypto::public_key_to_pem(&public_key)
            .map_err(|e| KeyHandlerError::PublicKey(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key_pem,
        })
    }
}

#[async_trait]
impl KeyHandler for EphemeralKeyHandler {
    async fn init(&self) -> Result<(), KeyHandlerError> {
        // key material exists from construction
        Ok(())
    }

    async fn public_key_pem(&self) -> Result<String, KeyHandlerError> {
        Ok(self.public_key_pem.clone())
    }

    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KeyHandlerError> {
        crypto::unwrap(&self.private_key, wrapped).map_err(|_| KeyHandlerError::Unwrap)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_unwrap_roundtrip() {
        let handler = EphemeralKeyHandler::generate().unwrap();
        let pem = handler.public_key_pem().await.unwrap();
        let public_key = crypto::parse_public_key_pem(&pem).unwrap();

        let raw = b"session key material";
        let wrapped = crypto::wrap(&public_key, raw).unwrap();
        let unwrapped = handler.unwrap_key(&wrapped).await.unwrap();
        assert_eq!(unwrapped.as_slice(), raw.as_slice());
    }

    #[tokio::test]
    async fn test_unwrap_garbage_fails() {
        let handler = EphemeralKeyHandler::generate().unwrap();
        assert!(handler.unwrap_key(&[0u8; 256]).await.is_err());
    }
}
