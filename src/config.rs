//! Configuration types for the WS-Security preprocessor.

use crate::algorithm::{DigestAlgorithm, KeyTransportAlgorithm, SignatureAlgorithm, SymmetricAlgorithm};
use crate::crypto::{CryptoConfigStore, CryptoProvider, DEFAULT_KEYSTORE_TYPE, DEFAULT_PROVIDER};
use crate::encryption::EncryptionOperation;
use crate::error::WssError;
use crate::header::WsseHeaderBuilder;
use crate::keystore::KeystoreProvider;
use crate::operation::{OperationKind, SecurityOperation, WsSecOperation};
use crate::parts::SecurityPart;
use crate::pipeline::SecureDocumentPipeline;
use crate::signature::SignatureOperation;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Main configuration for the preprocessor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreProcessorConfig {
    /// Config version
    pub version: String,

    /// Crypto provider and keystore
    pub crypto: CryptoConfig,

    /// Security header options
    pub header: HeaderConfig,

    /// The operation applied to every payload
    pub operation: OperationConfig,
}

impl Default for PreProcessorConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            crypto: CryptoConfig::default(),
            header: HeaderConfig::default(),
            operation: OperationConfig::default(),
        }
    }
}

/// Crypto provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CryptoConfig {
    /// Crypto provider id
    pub provider: String,

    /// Keystore location
    pub keystore_file: Option<String>,

    /// Keystore password
    pub keystore_password: Option<String>,

    /// Keystore type: "pem", "jks" or "pkcs12"
    pub keystore_type: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            keystore_file: None,
            keystore_password: None,
            keystore_type: DEFAULT_KEYSTORE_TYPE.to_string(),
        }
    }
}

/// Security header configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeaderConfig {
    /// Set mustUnderstand on wsse:Security
    pub must_understand: bool,

    /// SOAP actor (1.1) / role (1.2) of the header
    pub actor: Option<String>,

    /// Add a wsu:Timestamp with this lifetime
    pub timestamp_ttl_secs: Option<u64>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            must_understand: true,
            actor: None,
            timestamp_ttl_secs: None,
        }
    }
}

/// Operation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OperationConfig {
    /// "signature" or "encryption"
    #[serde(rename = "type")]
    pub kind: OperationKind,

    /// Keystore alias of the signing key or the recipient certificate
    pub credential_alias: Option<String>,

    /// Private key password
    pub credential_password: Option<String>,

    /// Key identifier label, e.g. "Binary Security Token"
    pub key_identifier: Option<String>,

    /// Parts to secure, in order
    pub parts_to_secure: Vec<SecurityPart>,

    /// Signature only
    pub signature_algorithm: Option<SignatureAlgorithm>,

    /// Signature only
    pub digest_algorithm: Option<DigestAlgorithm>,

    /// Encryption only
    pub symmetric_algorithm: Option<SymmetricAlgorithm>,

    /// Encryption only
    pub key_transport_algorithm: Option<KeyTransportAlgorithm>,
}

impl PreProcessorConfig {
    pub fn from_yaml(content: &str) -> Result<Self, WssError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| WssError::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, WssError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| WssError::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WssError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Check everything that can be checked without touching the keystore.
    pub fn validate(&self) -> Result<(), WssError> {
        self.build_operation().map(|_| ())
    }

    pub fn build_operation(&self) -> Result<WsSecOperation, WssError> {
        let op = &self.operation;
        let mut operation = match op.kind {
            OperationKind::Signature => {
                if op.symmetric_algorithm.is_some() || op.key_transport_algorithm.is_some() {
                    warn!("Encryption algorithms are ignored for a signature operation");
                }
                let mut signature = SignatureOperation::new();
                if let Some(algorithm) = op.signature_algorithm {
                    signature.set_signature_algorithm(algorithm);
                }
                if let Some(algorithm) = op.digest_algorithm {
                    signature.set_digest_algorithm(algorithm);
                }
                WsSecOperation::from(signature)
            }
            OperationKind::Encryption => {
                if op.signature_algorithm.is_some() || op.digest_algorithm.is_some() {
                    warn!("Signature algorithms are ignored for an encryption operation");
                }
                let mut encryption = EncryptionOperation::new();
                if let Some(algorithm) = op.symmetric_algorithm {
                    encryption.set_symmetric_algorithm(algorithm);
                }
                if let Some(algorithm) = op.key_transport_algorithm {
                    encryption.set_key_transport_algorithm(algorithm);
                }
                WsSecOperation::from(encryption)
            }
        };

        if let Some(alias) = &op.credential_alias {
            operation.set_credential_alias(alias);
        }
        if let Some(password) = &op.credential_password {
            operation.set_credential_password(password);
        }
        if let Some(label) = &op.key_identifier {
            operation.set_key_identifier(label)?;
        }
        Ok(operation)
    }

    pub fn build_crypto_store(&self, provider: Arc<dyn CryptoProvider>) -> CryptoConfigStore {
        let mut store = CryptoConfigStore::new(provider);
        store.set_provider(self.crypto.provider.as_str());
        store.set_keystore_type(self.crypto.keystore_type.as_str());
        if let Some(file) = &self.crypto.keystore_file {
            store.set_keystore_file(file.as_str());
        }
        if let Some(password) = &self.crypto.keystore_password {
            store.set_keystore_password(password.as_str());
        }
        store
    }

    pub fn build_header_builder(&self) -> WsseHeaderBuilder {
        WsseHeaderBuilder {
            must_understand: self.header.must_understand,
            actor: self.header.actor.clone(),
            timestamp_ttl_secs: self.header.timestamp_ttl_secs,
        }
    }

    /// Build a pipeline using the built-in keystore provider.
    pub fn build_pipeline(&self) -> Result<SecureDocumentPipeline, WssError> {
        if self.crypto.provider != DEFAULT_PROVIDER {
            return Err(WssError::Config(format!(
                "unknown crypto provider '{}' (available: {})",
                self.crypto.provider, DEFAULT_PROVIDER
            )));
        }
        let operation = self.build_operation()?;
        let crypto = self.build_crypto_store(Arc::new(KeystoreProvider));
        let mut pipeline = SecureDocumentPipeline::new(operation, crypto)
            .with_header_builder(Arc::new(self.build_header_builder()));
        pipeline.set_parts_to_secure(self.operation.parts_to_secure.clone());
        Ok(pipeline)
    }
}
