//! Per-request session keys for chunked body encryption
//!
//! A [`SessionKey`] is a ChaCha20 key + IV pair that lives for a single
//! request/response exchange. Chunked bodies are encrypted as one continuous
//! keystream: encrypting a payload in N arbitrary chunks with a stateful
//! [`SessionKey::cipher`] produces exactly the same bytes as a one-shot
//! [`SessionKey::encrypt`] of the concatenation, so chunk boundaries are
//! transparent to the recipient.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use rand::RngCore;

/// Size of a session key in bytes (256 bits)
pub const SESSION_KEY_SIZE: usize = 32;
/// Size of a session IV in bytes (96-bit ChaCha20 nonce)
pub const SESSION_IV_SIZE: usize = 12;

/// Errors that can occur when constructing a session key
#[derive(Debug, thiserror::Error)]
pub enum SessionKeyError {
    #[error("invalid session key size, expected {SESSION_KEY_SIZE}, got {0}")]
    InvalidKeySize(usize),
    #[error("invalid session IV size, expected {SESSION_IV_SIZE}, got {0}")]
    InvalidIvSize(usize),
}

/// An ephemeral symmetric key + IV pair, scoped to one request/response
///
/// Generated at most once per request for response encryption, or received
/// wrapped from the caller for request decryption. Never persisted, never
/// reused across requests.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
    iv: [u8; SESSION_IV_SIZE],
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log key material
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

impl SessionKey {
    /// Generate a new random session key using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_SIZE];
        let mut iv = [0u8; SESSION_IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        rand::rngs::OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Reconstruct a session key from raw key and IV bytes
    ///
    /// # Errors
    ///
    /// Returns an error if either slice has the wrong length.
    pub fn from_parts(key: &[u8], iv: &[u8]) -> Result<Self, SessionKeyError> {
        if key.len() != SESSION_KEY_SIZE {
            return Err(SessionKeyError::InvalidKeySize(key.len()));
        }
        if iv.len() != SESSION_IV_SIZE {
            return Err(SessionKeyError::InvalidIvSize(iv.len()));
        }
        let mut key_buff = [0u8; SESSION_KEY_SIZE];
        let mut iv_buff = [0u8; SESSION_IV_SIZE];
        key_buff.copy_from_slice(key);
        iv_buff.copy_from_slice(iv);
        Ok(Self {
            key: key_buff,
            iv: iv_buff,
        })
    }

    /// Raw key bytes
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Raw IV bytes
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Key and IV concatenated (`key || iv`), the form used inside envelopes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SESSION_KEY_SIZE + SESSION_IV_SIZE);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    /// Reconstruct a session key from `key || iv` concatenated bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionKeyError> {
        if bytes.len() != SESSION_KEY_SIZE + SESSION_IV_SIZE {
            return Err(SessionKeyError::InvalidKeySize(bytes.len()));
        }
        Self::from_parts(&bytes[..SESSION_KEY_SIZE], &bytes[SESSION_KEY_SIZE..])
    }

    /// Create a fresh stateful stream cipher positioned at keystream offset 0
    ///
    /// Feed chunks through it in arrival order; the keystream advances with
    /// every call, so the concatenated output equals a one-shot transform.
    pub fn cipher(&self) -> ChaCha20 {
        ChaCha20::new(&self.key.into(), &self.iv.into())
    }

    /// One-shot encryption of a whole buffer
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    /// One-shot decryption of a whole buffer
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut buff = data.to_vec();
        self.cipher().apply_keystream(&mut buff);
        buff
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let session = SessionKey::generate();
        let data = b"hello world, this is a test message for session encryption";

        let encrypted = session.encrypt(data);
        assert_ne!(encrypted.as_slice(), data.as_slice());

        let decrypted = session.decrypt(&encrypted);
        assert_eq!(decrypted.as_slice(), data.as_slice());
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let session = SessionKey::generate();
        let recovered = SessionKey::from_parts(session.key(), session.iv()).unwrap();
        assert_eq!(session, recovered);

        let bytes = session.to_bytes();
        let recovered = SessionKey::from_bytes(&bytes).unwrap();
        assert_eq!(session, recovered);
    }

    #[test]
    fn test_size_validation() {
        assert!(SessionKey::from_parts(&[0u8; 16], &[0u8; 12]).is_err());
        assert!(SessionKey::from_parts(&[0u8; 32], &[0u8; 16]).is_err());
        assert!(SessionKey::from_parts(&[0u8; 32], &[0u8; 12]).is_ok());
        assert!(SessionKey::from_bytes(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_chunked_encryption_equals_one_shot() {
        let session = SessionKey::generate();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        // Feed arbitrary-sized chunks through one stateful cipher
        let mut cipher = session.cipher();
        let mut chunked = Vec::new();
        for chunk in data.chunks(379) {
            let mut buff = chunk.to_vec();
            cipher.apply_keystream(&mut buff);
            chunked.extend_from_slice(&buff);
        }

        // Keystream state must survive chunk boundaries
        assert_eq!(chunked, session.encrypt(&data));
        assert_eq!(session.decrypt(&chunked), data);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let session = SessionKey::generate();
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("key:"));
    }
}
