//! WS-Security preprocessor for Zentinel load tests
//!
//! Secures the SOAP payload of every test iteration before it is sent:
//! parses the payload, inserts a `wsse:Security` header and signs or
//! encrypts the configured parts with credentials from a keystore. When
//! anything goes wrong the payload is sent unmodified and the error is
//! logged and returned.
//!
//! # Features
//!
//! - XML Signature (RSA-SHA1/256/512, exclusive C14N) of selected parts
//! - XML Encryption (AES-CBC with RSA-OAEP or RSA 1.5 key transport)
//! - Key identifiers per the WSS X.509 token profile, validated per operation
//! - Fresh crypto handle per iteration, so keystore edits apply immediately
//! - Keystore provider reading PEM bundles, JKS and PKCS#12 files
//!
//! # Example
//!
//! ```ignore
//! use zentinel_wss_preprocessor::PreProcessorConfig;
//!
//! let config = PreProcessorConfig::load("config.yaml")?;
//! let pipeline = config.build_pipeline()?;
//!
//! let mut payload = Some(soap_request);
//! pipeline.process(&mut payload)?;
//! ```

pub mod algorithm;
pub mod c14n;
pub mod config;
pub mod crypto;
pub mod document;
pub mod encryption;
pub mod error;
pub mod header;
mod jks;
pub mod key_identifier;
pub mod keystore;
pub mod operation;
pub mod parts;
pub mod pipeline;
pub mod signature;
pub mod token;

pub use config::PreProcessorConfig;
pub use crypto::{Crypto, CryptoConfigStore, CryptoProvider};
pub use document::Document;
pub use encryption::EncryptionOperation;
pub use error::{WssError, WssResult};
pub use header::{SecurityHeader, SecurityHeaderBuilder, WsseHeaderBuilder};
pub use key_identifier::{KeyIdentifier, KeyIdentifierRegistry};
pub use keystore::KeystoreProvider;
pub use operation::{OperationKind, SecurityOperation, WsSecOperation};
pub use parts::{PartMode, SecurityPart, SecurityPartSelector};
pub use pipeline::{PayloadHost, PipelineMetrics, ProcessOutcome, SecureDocumentPipeline};
pub use signature::SignatureOperation;
