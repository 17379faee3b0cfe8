//! Crypto provider configuration and the crypto handle abstraction.
//!
//! A [`CryptoConfigStore`] holds provider-scoped properties and manufactures
//! a fresh [`Crypto`] handle from them on every request, so edits made
//! between iterations always take effect.

use crate::algorithm::{DigestAlgorithm, KeyTransportAlgorithm, SignatureAlgorithm, SymmetricAlgorithm};
use crate::error::WssError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const PROVIDER_KEY: &str = "crypto.provider";
pub const KEYSTORE_FILE_KEY: &str = "crypto.keystore.file";
pub const KEYSTORE_PASSWORD_KEY: &str = "crypto.keystore.password";
pub const KEYSTORE_TYPE_KEY: &str = "crypto.keystore.type";

pub const DEFAULT_PROVIDER: &str = "keystore";
pub const DEFAULT_KEYSTORE_TYPE: &str = "jks";

/// Provider-scoped crypto properties.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoConfiguration {
    properties: BTreeMap<String, String>,
}

impl Default for CryptoConfiguration {
    fn default() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(PROVIDER_KEY.to_string(), DEFAULT_PROVIDER.to_string());
        properties.insert(KEYSTORE_TYPE_KEY.to_string(), DEFAULT_KEYSTORE_TYPE.to_string());
        Self { properties }
    }
}

impl fmt::Debug for CryptoConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.properties {
            if key == KEYSTORE_PASSWORD_KEY {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl CryptoConfiguration {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn provider(&self) -> &str {
        self.get(PROVIDER_KEY).unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn keystore_type(&self) -> &str {
        self.get(KEYSTORE_TYPE_KEY).unwrap_or(DEFAULT_KEYSTORE_TYPE)
    }

    pub fn keystore_file(&self) -> Option<&str> {
        self.get(KEYSTORE_FILE_KEY)
    }

    pub fn keystore_password(&self) -> Option<&str> {
        self.get(KEYSTORE_PASSWORD_KEY)
    }
}

/// RSA public key components for `ds:RSAKeyValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyValue {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

/// Certificate details needed to build token references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Credential {
    pub alias: String,
    /// DER encoding of the certificate
    pub certificate_der: Vec<u8>,
    /// RFC 4514 issuer distinguished name
    pub issuer_name: String,
    /// Serial number in decimal
    pub serial_number: String,
    pub subject_key_identifier: Vec<u8>,
    pub key_value: Option<RsaKeyValue>,
}

/// A crypto handle: resolves credentials and performs the primitive
/// operations the security strategies need.
pub trait Crypto {
    fn certificate(&self, alias: &str) -> Result<X509Credential, WssError>;

    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>, WssError>;

    /// Sign with the private key stored under `alias`.
    fn sign(
        &self,
        alias: &str,
        password: Option<&str>,
        algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, WssError>;

    fn generate_key(&self, algorithm: SymmetricAlgorithm) -> Result<Vec<u8>, WssError>;

    /// Wrap a session key for the certificate stored under `alias`.
    fn encrypt_key(
        &self,
        alias: &str,
        algorithm: KeyTransportAlgorithm,
        key: &[u8],
    ) -> Result<Vec<u8>, WssError>;

    /// Encrypt `data`, returning IV followed by ciphertext.
    fn encrypt_data(
        &self,
        algorithm: SymmetricAlgorithm,
        key: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, WssError>;
}

/// Factory for crypto handles.
pub trait CryptoProvider: Send + Sync {
    fn create_handle(&self, configuration: &CryptoConfiguration) -> Result<Box<dyn Crypto>, WssError>;
}

/// Mutable crypto configuration plus the provider it is handed to.
#[derive(Clone)]
pub struct CryptoConfigStore {
    configuration: CryptoConfiguration,
    provider: Arc<dyn CryptoProvider>,
}

impl fmt::Debug for CryptoConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfigStore")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

impl CryptoConfigStore {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            configuration: CryptoConfiguration::default(),
            provider,
        }
    }

    pub fn configuration(&self) -> &CryptoConfiguration {
        &self.configuration
    }

    pub fn keystore_file(&self) -> Option<&str> {
        self.configuration.keystore_file()
    }

    pub fn set_keystore_file(&mut self, path: impl Into<String>) {
        self.configuration.set(KEYSTORE_FILE_KEY, path);
    }

    pub fn keystore_password(&self) -> Option<&str> {
        self.configuration.keystore_password()
    }

    pub fn set_keystore_password(&mut self, password: impl Into<String>) {
        self.configuration.set(KEYSTORE_PASSWORD_KEY, password);
    }

    pub fn keystore_type(&self) -> &str {
        self.configuration.keystore_type()
    }

    pub fn set_keystore_type(&mut self, keystore_type: impl Into<String>) {
        self.configuration.set(KEYSTORE_TYPE_KEY, keystore_type);
    }

    pub fn provider_name(&self) -> &str {
        self.configuration.provider()
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.configuration.set(PROVIDER_KEY, provider);
    }

    /// Build a new handle from the current configuration. Nothing is cached.
    pub fn new_crypto_handle(&self) -> Result<Box<dyn Crypto>, WssError> {
        debug!(
            provider = self.configuration.provider(),
            keystore_type = self.configuration.keystore_type(),
            keystore_file = ?self.configuration.keystore_file(),
            "Creating crypto handle"
        );
        self.provider
            .create_handle(&self.configuration)
            .map_err(|e| match e {
                WssError::CryptoInit(_) => e,
                other => WssError::CryptoInit(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the configuration it was asked to build from.
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<Option<String>>>,
    }

    impl CryptoProvider for RecordingProvider {
        fn create_handle(&self, configuration: &CryptoConfiguration) -> Result<Box<dyn Crypto>, WssError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(configuration.keystore_file().map(str::to_string));
            }
            Err(WssError::SecurityApply("no handles here".to_string()))
        }
    }

    #[test]
    fn test_defaults() {
        let config = CryptoConfiguration::default();
        assert_eq!(config.provider(), "keystore");
        assert_eq!(config.keystore_type(), "jks");
        assert_eq!(config.keystore_file(), None);
        assert_eq!(config.keystore_password(), None);
    }

    #[test]
    fn test_setters_write_provider_keys() {
        let mut store = CryptoConfigStore::new(Arc::new(RecordingProvider::default()));
        store.set_keystore_file("/tmp/a.pem");
        store.set_keystore_password("secret");
        store.set_keystore_type("pem");

        let config = store.configuration();
        assert_eq!(config.get(KEYSTORE_FILE_KEY), Some("/tmp/a.pem"));
        assert_eq!(config.get(KEYSTORE_PASSWORD_KEY), Some("secret"));
        assert_eq!(config.get(KEYSTORE_TYPE_KEY), Some("pem"));
        assert_eq!(store.provider_name(), DEFAULT_PROVIDER);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = CryptoConfiguration::default();
        config.set(KEYSTORE_PASSWORD_KEY, "hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_every_handle_reads_current_configuration() {
        let provider = Arc::new(RecordingProvider::default());
        let mut store = CryptoConfigStore::new(provider.clone());

        store.set_keystore_file("first.pem");
        let _ = store.new_crypto_handle();
        store.set_keystore_file("second.pem");
        let err = store.new_crypto_handle().err().unwrap();

        // Provider failures surface as crypto initialization errors
        assert!(matches!(err, WssError::CryptoInit(_)));
        let seen = provider.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![Some("first.pem".to_string()), Some("second.pem".to_string())]
        );
    }
}
