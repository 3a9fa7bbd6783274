//! Environment-sourced container configuration
//!
//! Read once at boot and immutable afterwards. The proxy stages only ever
//! borrow it. A missing workload base URL is a fatal boot error; everything
//! else has a default.

use url::Url;

/// Default header carrying the encrypted target path+query
pub const DEFAULT_URL_HEADER: &str = "polaris-url";
/// Default header carrying the encrypted forwarded-header JSON
pub const DEFAULT_SECURE_HEADER: &str = "polaris-secure";
/// Default header carrying the caller's response public key (base64 PEM)
pub const DEFAULT_RESPONSE_PUBLIC_KEY_HEADER: &str = "polaris-response-public-key";
/// Default header carrying a wrapped session key pair
/// (`base64(wrapped_key):base64(wrapped_iv)`)
pub const DEFAULT_RESPONSE_WRAPPED_KEY_HEADER: &str = "polaris-response-wrapped-key";

const DEFAULT_PORT: u16 = 3000;

/// Which key handler backend supplies the container's key material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHandlerKind {
    Ephemeral,
    AttestedRelease,
    FederatedKms,
}

impl std::str::FromStr for KeyHandlerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "attested-release" => Ok(Self::AttestedRelease),
            "federated-kms" => Ok(Self::FederatedKms),
            other => Err(ConfigError::InvalidKeyType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// base URL of the co-located workload (required)
    pub workload_base_url: Url,

    // encryption toggles
    pub enable_input_encryption: bool,
    pub enable_output_encryption: bool,

    // header selectors (lowercase header names)
    pub url_header: String,
    pub secure_header: String,
    pub response_public_key_header: String,
    pub response_wrapped_key_header: String,

    // key backend selection
    pub key_handler: KeyHandlerKind,

    // http surface
    pub enable_cors: bool,
    pub listen_port: u16,

    // misc
    pub log_level: tracing::Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("POLARIS_CONTAINER_WORKLOAD_BASE_URL is required")]
    MissingWorkloadBaseUrl,
    #[error("invalid workload base URL: {0}")]
    InvalidWorkloadBaseUrl(#[from] url::ParseError),
    #[error("invalid key type: {0}")]
    InvalidKeyType(String),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

impl Config {
    /// Load configuration from `POLARIS_CONTAINER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let flag = |name: &str| lookup(name).map(|v| v == "true").unwrap_or(false);
        let header = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.to_ascii_lowercase())
                .unwrap_or_else(|| default.to_string())
        };

        let workload_base_url = lookup("POLARIS_CONTAINER_WORKLOAD_BASE_URL")
            .ok_or(ConfigError::MissingWorkloadBaseUrl)?;
        let workload_base_url = Url::parse(&workload_base_url)?;

        let key_handler = lookup("POLARIS_CONTAINER_KEY_TYPE")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(KeyHandlerKind::Ephemeral);

        let log_level = match lookup("POLARIS_CONTAINER_LOG_LEVEL") {
            Some(level) => level
                .parse()
                .map_err(|_| ConfigError::InvalidLogLevel(level))?,
            None => tracing::Level::INFO,
        };

        let listen_port = match lookup("PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::InvalidPort(port))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            workload_base_url,
            enable_input_encryption: flag("POLARIS_CONTAINER_ENABLE_INPUT_ENCRYPTION"),
            enable_output_encryption: flag("POLARIS_CONTAINER_ENABLE_OUTPUT_ENCRYPTION"),
            url_header: header("POLARIS_CONTAINER_URL_HEADER_KEY", DEFAULT_URL_HEADER),
            secure_header: header("POLARIS_CONTAINER_HEADER_KEY", DEFAULT_SECURE_HEADER),
            response_public_key_header: header(
                "POLARIS_CONTAINER_RESPONSE_PUBLIC_KEY_HEADER",
                DEFAULT_RESPONSE_PUBLIC_KEY_HEADER,
            ),
            response_wrapped_key_header: header(
                "POLARIS_CONTAINER_RESPONSE_WRAPPED_KEY_HEADER",
                DEFAULT_RESPONSE_WRAPPED_KEY_HEADER,
            ),
            key_handler,
            enable_cors: flag("POLARIS_CONTAINER_ENABLE_CORS"),
            listen_port,
            log_level,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_missing_workload_base_url_is_fatal() {
        assert!(matches!(
            from_map(&[]),
            Err(ConfigError::MissingWorkloadBaseUrl)
        ));
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[(
            "POLARIS_CONTAINER_WORKLOAD_BASE_URL",
            "http://localhost:3001",
        )])
        .unwrap();

        assert_eq!(config.workload_base_url.as_str(), "http://localhost:3001/");
        assert!(!config.enable_input_encryption);
        assert!(!config.enable_output_encryption);
        assert!(!config.enable_cors);
        assert_eq!(config.url_header, DEFAULT_URL_HEADER);
        assert_eq!(config.secure_header, DEFAULT_SECURE_HEADER);
        assert_eq!(
            config.response_public_key_header,
            DEFAULT_RESPONSE_PUBLIC_KEY_HEADER
        );
        assert_eq!(
            config.response_wrapped_key_header,
            DEFAULT_RESPONSE_WRAPPED_KEY_HEADER
        );
        assert_eq!(config.key_handler, KeyHandlerKind::Ephemeral);
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("POLARIS_CONTAINER_WORKLOAD_BASE_URL", "http://wl:8080"),
            ("POLARIS_CONTAINER_ENABLE_INPUT_ENCRYPTION", "true"),
            ("POLARIS_CONTAINER_ENABLE_OUTPUT_ENCRYPTION", "true"),
            ("POLARIS_CONTAINER_ENABLE_CORS", "true"),
            ("POLARIS_CONTAINER_KEY_TYPE", "attested-release"),
            ("POLARIS_CONTAINER_HEADER_KEY", "X-Secure"),
            ("POLARIS_CONTAINER_LOG_LEVEL", "debug"),
            ("PORT", "8443"),
        ])
        .unwrap();

        assert!(config.enable_input_encryption);
        assert!(config.enable_output_encryption);
        assert!(config.enable_cors);
        assert_eq!(config.key_handler, KeyHandlerKind::AttestedRelease);
        // header selectors are normalized to lowercase
        assert_eq!(config.secure_header, "x-secure");
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.listen_port, 8443);
    }

    #[test]
    fn test_invalid_key_type() {
        let result = from_map(&[
            ("POLARIS_CONTAINER_WORKLOAD_BASE_URL", "http://wl:8080"),
            ("POLARIS_CONTAINER_KEY_TYPE", "vault"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidKeyType(_))));
    }
}
