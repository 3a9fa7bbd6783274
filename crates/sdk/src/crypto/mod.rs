//! Cryptographic primitives for the Polaris Container
//!
//! This module provides the cryptographic foundation for the encryption proxy:
//!
//! - **Key Wrapping**: RSA-OAEP (SHA-256) for wrapping session keys under a
//!   recipient's public key
//! - **Session Encryption**: ChaCha20 stream cipher for chunked body
//!   encryption with per-request session keys
//! - **Envelopes**: ChaCha20-Poly1305 AEAD envelopes for whole-body
//!   asymmetric encryption
//!
//! # Security Model
//!
//! ## Container Identity
//! The container holds one RSA keypair (supplied by a [`crate::key::KeyHandler`]).
//! Callers encrypt request material under its public key; only the key handler
//! can unwrap it.
//!
//! ## Session Keys
//! Every streamed body is encrypted with an ephemeral [`SessionKey`] (ChaCha20
//! key + IV). The key never crosses the wire in clear: it is wrapped under the
//! recipient's RSA public key and carried in a header as
//! `base64(wrapped_key):base64(wrapped_iv)`.
//!
//! ## Envelope Format
//! Whole-body asymmetric ciphertext is a hybrid envelope:
//!
//! ```text
//! wrapped_len (u16 BE) || rsa_oaep(key || iv) || chacha20poly1305(plaintext)
//! ```
//!
//! The AEAD tag makes corrupted ciphertext fail closed, and the wrapped
//! segment can be handed to a key handler that never materializes the private
//! key locally (e.g. a cloud KMS asymmetric-decrypt operation).

mod envelope;
mod keys;
mod session;

pub use envelope::{open, seal, split, EnvelopeError};
pub use keys::{
    parse_public_key_pem, public_key_to_pem, unwrap, wrap, KeyError, RSA_KEY_BITS,
};
pub use session::{SessionKey, SessionKeyError, SESSION_IV_SIZE, SESSION_KEY_SIZE};
