//! Hybrid asymmetric envelopes for whole-body encryption
//!
//! Format: `wrapped_len (u16 BE) || rsa_oaep(key || iv) || chacha20poly1305(plaintext)`
//!
//! The session key is wrapped under the recipient's RSA public key and the
//! payload is sealed with ChaCha20-Poly1305 using that key (the IV doubles as
//! the AEAD nonce). Opening is split in two steps so that the unwrap of the
//! RSA segment can be delegated to a key handler: [`split`] separates the
//! wrapped segment from the sealed payload, [`open`] decrypts the payload once
//! the session key has been recovered.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rsa::RsaPublicKey;

use super::keys::{self, KeyError};
use super::session::SessionKey;

/// Size of the length prefix in bytes
const LEN_PREFIX_SIZE: usize = 2;

/// Errors that can occur during envelope operations
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope too short")]
    TooShort,
    #[error("envelope wrapped segment too large")]
    WrappedTooLarge,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("envelope seal failed")]
    Seal,
    #[error("envelope open failed")]
    Open,
}

/// Seal plaintext into an envelope for a recipient public key
///
/// A fresh session key is generated per envelope and wrapped under the
/// recipient's key with RSA-OAEP.
pub fn seal(recipient: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let session = SessionKey::generate();
    let wrapped = keys::wrap(recipient, &session.to_bytes())?;
    if wrapped.len() > u16::MAX as usize {
        return Err(EnvelopeError::WrappedTooLarge);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(session.key()));
    let sealed = cipher
        .encrypt(Nonce::from_slice(session.iv()), plaintext)
        .map_err(|_| EnvelopeError::Seal)?;

    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + wrapped.len() + sealed.len());
    out.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Split an envelope into its wrapped-key segment and sealed payload
///
/// # Errors
///
/// Returns an error if the envelope is shorter than its declared layout.
pub fn split(envelope: &[u8]) -> Result<(&[u8], &[u8]), EnvelopeError> {
    if envelope.len() < LEN_PREFIX_SIZE {
        return Err(EnvelopeError::TooShort);
    }
    let wrapped_len = u16::from_be_bytes([envelope[0], envelope[1]]) as usize;
    let body_start = LEN_PREFIX_SIZE + wrapped_len;
    if envelope.len() < body_start {
        return Err(EnvelopeError::TooShort);
    }
    Ok((&envelope[LEN_PREFIX_SIZE..body_start], &envelope[body_start..]))
}

/// Open a sealed payload with a recovered session key
///
/// # Errors
///
/// Fails if the authentication tag does not verify (wrong key or corrupted
/// ciphertext).
pub fn open(session: &SessionKey, sealed: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session.key()));
    cipher
        .decrypt(Nonce::from_slice(session.iv()), sealed)
        .map_err(|_| EnvelopeError::Open)
}
