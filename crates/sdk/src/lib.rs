//! Cryptographic capability for the Polaris Container.
//!
//! This crate provides the two capabilities the encryption proxy is built on:
//! - [`crypto`]: the cryptographic primitives (asymmetric envelopes, session
//!   keys, key wrapping)
//! - [`key`]: the pluggable key handlers that supply the container's key
//!   material (ephemeral, attested-release, federated-kms)
//!
//! The [`PolarisSdk`] ties the two together: it performs all encryption and
//! decryption while delegating private-key operations to the configured
//! [`key::KeyHandler`], so private-key custody never leaks out of the handler.

pub mod crypto;
pub mod key;
mod sdk;

pub use crypto::{SessionKey, SESSION_IV_SIZE, SESSION_KEY_SIZE};
pub use key::{
    AttestedReleaseKeyHandler, DynKeyHandler, EphemeralKeyHandler, FederatedKmsKeyHandler,
    KeyHandler, KeyHandlerError,
};
pub use sdk::{PolarisSdk, SdkError};
