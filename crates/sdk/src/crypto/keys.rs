use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Modulus size for container keypairs (ephemeral handler)
pub const RSA_KEY_BITS: usize = 2048;

/// Errors that can occur during key wrap operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid public key PEM: {0}")]
    InvalidPem(#[from] rsa::pkcs8::spki::Error),
    #[error("key wrap failed: {0}")]
    Wrap(rsa::Error),
    #[error("key unwrap failed")]
    Unwrap,
}

/// Parse an RSA public key from PKCS#8 PEM
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, KeyError> {
    Ok(RsaPublicKey::from_public_key_pem(pem)?)
}

/// Encode an RSA public key as PKCS#8 PEM
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, KeyError> {
    Ok(key.to_public_key_pem(LineEnding::LF)?)
}

/// Wrap raw key bytes under a recipient's public key using RSA-OAEP (SHA-256)
pub fn wrap(recipient: &RsaPublicKey, raw: &[u8]) -> Result<Vec<u8>, KeyError> {
    let mut rng = rand::rngs::OsRng;
    recipient
        .encrypt(&mut rng, Oaep::new::<Sha256>(), raw)
        .map_err(KeyError::Wrap)
}

/// Unwrap RSA-OAEP (SHA-256) wrapped bytes with a private key
///
/// The error carries no detail on purpose: unwrap failures are surfaced to
/// callers as a generic cryptographic error.
pub fn unwrap(private_key: &RsaPrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, KeyError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| KeyError::Unwrap)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap();
        let public_key = private_key.to_public_key();

        let raw = b"some raw symmetric key material";
        let wrapped = wrap(&public_key, raw).unwrap();
        assert_ne!(wrapped.as_slice(), raw.as_slice());

        let unwrapped = unwrap(&private_key, &wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), raw.as_slice());
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap();
        let other_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap();

        let wrapped = wrap(&private_key.to_public_key(), b"key material").unwrap();
        assert!(unwrap(&other_key, &wrapped).is_err());
    }

    #[test]
    fn test_pem_roundtrip() {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap();
        let public_key = private_key.to_public_key();

        let pem = public_key_to_pem(&public_key).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let recovered = parse_public_key_pem(&pem).unwrap();
        assert_eq!(public_key, recovered);
    }
}
