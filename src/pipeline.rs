//! Per-iteration preprocessing pipeline.
//!
//! Parses the host's payload, inserts the security header, applies the
//! configured operation with a fresh crypto handle and writes the secured
//! document back. Any failure is logged and returned with the payload left
//! exactly as it was, so the request is sent unsecured rather than not at all.

use crate::crypto::CryptoConfigStore;
use crate::document::Document;
use crate::error::WssError;
use crate::header::{SecurityHeaderBuilder, WsseHeaderBuilder};
use crate::operation::{SecurityOperation, WsSecOperation};
use crate::parts::{SecurityPart, SecurityPartSelector};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Where the payload of the current request lives.
pub trait PayloadHost {
    fn payload(&self) -> Option<String>;
    fn set_payload(&mut self, payload: String);
}

/// An in-memory payload slot.
impl PayloadHost for Option<String> {
    fn payload(&self) -> Option<String> {
        self.clone()
    }

    fn set_payload(&mut self, payload: String) {
        *self = Some(payload);
    }
}

/// Result of a successful `process()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The host had no payload; nothing was done
    NoPayload,
    /// The payload was replaced with the secured document
    Secured,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub processed: u64,
    pub secured: u64,
    pub failed: u64,
}

/// Secures one payload per call with the current configuration.
pub struct SecureDocumentPipeline {
    operation: WsSecOperation,
    parts: SecurityPartSelector,
    crypto: CryptoConfigStore,
    header_builder: Arc<dyn SecurityHeaderBuilder>,
    requests_processed: AtomicU64,
    requests_secured: AtomicU64,
    requests_failed: AtomicU64,
}

/// Clones share configuration but start with zeroed counters.
impl Clone for SecureDocumentPipeline {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            parts: self.parts.clone(),
            crypto: self.crypto.clone(),
            header_builder: Arc::clone(&self.header_builder),
            requests_processed: AtomicU64::new(0),
            requests_secured: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for SecureDocumentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureDocumentPipeline")
            .field("operation", &self.operation)
            .field("parts", &self.parts)
            .field("crypto", &self.crypto)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl SecureDocumentPipeline {
    pub fn new(operation: impl Into<WsSecOperation>, crypto: CryptoConfigStore) -> Self {
        let operation = operation.into();
        let parts = SecurityPartSelector::new();
        let mut pipeline = Self {
            operation,
            parts,
            crypto,
            header_builder: Arc::new(WsseHeaderBuilder::default()),
            requests_processed: AtomicU64::new(0),
            requests_secured: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        };
        // Start from whatever parts the operation was built with
        let initial = pipeline.operation.parts().to_vec();
        pipeline.set_parts_to_secure(initial);
        pipeline
    }

    pub fn with_header_builder(mut self, header_builder: Arc<dyn SecurityHeaderBuilder>) -> Self {
        self.header_builder = header_builder;
        self
    }

    pub fn operation(&self) -> &WsSecOperation {
        &self.operation
    }

    pub fn set_credential(&mut self, alias: &str, password: Option<&str>) {
        self.operation.set_credential(alias, password);
    }

    pub fn set_credential_alias(&mut self, alias: &str) {
        self.operation.set_credential_alias(alias);
    }

    pub fn set_credential_password(&mut self, password: &str) {
        self.operation.set_credential_password(password);
    }

    /// Select the key identifier by label, checked against the operation's
    /// variant.
    pub fn set_key_identifier(&mut self, label: &str) -> Result<(), WssError> {
        self.operation.set_key_identifier(label)
    }

    pub fn crypto(&self) -> &CryptoConfigStore {
        &self.crypto
    }

    pub fn crypto_mut(&mut self) -> &mut CryptoConfigStore {
        &mut self.crypto
    }

    pub fn parts_to_secure(&self) -> &[SecurityPart] {
        self.parts.parts()
    }

    /// Replace the parts to secure, resynchronizing the operation.
    pub fn set_parts_to_secure(&mut self, parts: Vec<SecurityPart>) {
        self.parts.set_parts(parts, &mut self.operation);
    }

    /// Secure the host's current payload.
    pub fn process(&self, host: &mut dyn PayloadHost) -> Result<ProcessOutcome, WssError> {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);

        let Some(payload) = host.payload() else {
            debug!("No payload to secure, skipping");
            return Ok(ProcessOutcome::NoPayload);
        };

        match self.secure(&payload) {
            Ok(secured) => {
                self.requests_secured.fetch_add(1, Ordering::Relaxed);
                debug!(
                    operation = %self.operation.kind(),
                    input_len = payload.len(),
                    output_len = secured.len(),
                    "Payload secured"
                );
                host.set_payload(secured);
                Ok(ProcessOutcome::Secured)
            }
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    code = e.code(),
                    operation = %self.operation.kind(),
                    error = %e,
                    "Failed to secure payload, sending it unmodified"
                );
                Err(e)
            }
        }
    }

    /// Secure an XML string without touching any host.
    pub fn secure(&self, xml: &str) -> Result<String, WssError> {
        let mut document = Document::parse(xml)?;
        let header = self.header_builder.insert_header(&mut document)?;
        let crypto = self.crypto.new_crypto_handle()?;
        let document = self.operation.apply(document, crypto.as_ref(), &header)?;
        document.into_pretty_string()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            processed: self.requests_processed.load(Ordering::Relaxed),
            secured: self.requests_secured.load(Ordering::Relaxed),
            failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeystoreProvider;
    use crate::parts::PartMode;
    use crate::signature::SignatureOperation;

    const REQUEST: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><Ping xmlns="urn:p"/></soap:Body></soap:Envelope>"#;

    fn pipeline() -> SecureDocumentPipeline {
        let mut crypto = CryptoConfigStore::new(Arc::new(KeystoreProvider));
        crypto.set_keystore_type("pem");
        crypto.set_keystore_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/alice.pem"));

        let mut operation = SignatureOperation::new();
        operation.set_credential("alice", None);
        let mut pipeline = SecureDocumentPipeline::new(operation, crypto);
        pipeline.set_parts_to_secure(vec![SecurityPart::new("Body", None, PartMode::Content)]);
        pipeline
    }

    #[test]
    fn test_no_payload() {
        let pipeline = pipeline();
        let mut host: Option<String> = None;
        assert_eq!(pipeline.process(&mut host).unwrap(), ProcessOutcome::NoPayload);
        assert!(host.is_none());
    }

    #[test]
    fn test_secures_payload() {
        let pipeline = pipeline();
        let mut host = Some(REQUEST.to_string());
        assert_eq!(pipeline.process(&mut host).unwrap(), ProcessOutcome::Secured);
        let secured = host.unwrap();
        assert!(secured.contains("<ds:SignatureValue>"));
        assert_eq!(
            pipeline.metrics(),
            PipelineMetrics {
                processed: 1,
                secured: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn test_malformed_payload_left_untouched() {
        let pipeline = pipeline();
        let mut host = Some("<not valid xml".to_string());
        let err = pipeline.process(&mut host).unwrap_err();
        assert!(matches!(err, WssError::XmlParse(_)));
        assert_eq!(host.as_deref(), Some("<not valid xml"));
        assert_eq!(pipeline.metrics().failed, 1);
    }

    #[test]
    fn test_crypto_failure_left_untouched() {
        let mut pipeline = pipeline();
        pipeline.crypto_mut().set_keystore_file("/nonexistent.pem");
        let mut host = Some(REQUEST.to_string());
        let err = pipeline.process(&mut host).unwrap_err();
        assert!(matches!(err, WssError::CryptoInit(_)));
        assert_eq!(host.as_deref(), Some(REQUEST));
    }

    #[test]
    fn test_non_soap_payload_left_untouched() {
        let pipeline = pipeline();
        let mut host = Some("<order/>".to_string());
        assert!(matches!(
            pipeline.process(&mut host).unwrap_err(),
            WssError::InvalidEnvelope(_)
        ));
        assert_eq!(host.as_deref(), Some("<order/>"));
    }

    #[test]
    fn test_parts_synchronized_into_operation() {
        let mut pipeline = pipeline();
        pipeline.set_parts_to_secure(vec![
            SecurityPart::new("A", None, PartMode::Element),
            SecurityPart::new("B", None, PartMode::Element),
        ]);
        pipeline.set_parts_to_secure(vec![SecurityPart::new("C", None, PartMode::Element)]);
        assert_eq!(pipeline.parts_to_secure().len(), 1);
        assert_eq!(pipeline.operation().parts(), pipeline.parts_to_secure());
    }

    #[test]
    fn test_operation_settings_keep_parts_in_sync() {
        let mut pipeline = pipeline();
        pipeline.set_credential("bob", Some("bobkeypass"));
        pipeline.set_credential_alias("alice");
        pipeline.set_credential_password("secret");
        pipeline.set_key_identifier("Subject Key Identifier").unwrap();
        assert!(pipeline.set_key_identifier("Encrypted Key SHA1").is_err());

        let settings = pipeline.operation().settings();
        assert_eq!(settings.credential_alias.as_deref(), Some("alice"));
        assert_eq!(settings.credential_password.as_deref(), Some("secret"));
        assert_eq!(pipeline.operation().parts(), pipeline.parts_to_secure());
    }

    #[test]
    fn test_empty_parts_still_inserts_header() {
        let mut pipeline = pipeline();
        pipeline.set_parts_to_secure(Vec::new());
        let secured = pipeline.secure(REQUEST).unwrap();
        assert!(secured.contains("<wsse:Security"));
        assert!(!secured.contains("ds:Signature"));
    }

    #[test]
    fn test_clone_resets_counters() {
        let pipeline = pipeline();
        let mut host = Some(REQUEST.to_string());
        pipeline.process(&mut host).unwrap();

        let clone = pipeline.clone();
        assert_eq!(clone.metrics(), PipelineMetrics::default());
        assert_eq!(clone.parts_to_secure(), pipeline.parts_to_secure());
    }
}
