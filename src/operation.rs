//! Security operation strategies.
//!
//! [`SecurityOperation`] carries the settings shared by every strategy
//! (credential, key identifier, parts) as provided methods; the concrete
//! strategies only supply [`SecurityOperation::apply`]. Editing settings
//! needs `&mut self` while `apply` takes `&self`, so a part list can never
//! change underneath a running apply.

use crate::crypto::Crypto;
use crate::document::Document;
use crate::encryption::EncryptionOperation;
use crate::error::WssError;
use crate::header::SecurityHeader;
use crate::key_identifier::{KeyIdentifier, KeyIdentifierRegistry, KeyIdentifierScope};
use crate::parts::SecurityPart;
use crate::signature::SignatureOperation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Signature,
    Encryption,
}

impl OperationKind {
    pub fn key_identifier_scope(&self) -> KeyIdentifierScope {
        match self {
            Self::Signature => KeyIdentifierScope::Signature,
            Self::Encryption => KeyIdentifierScope::Encryption,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signature => write!(f, "signature"),
            Self::Encryption => write!(f, "encryption"),
        }
    }
}

/// Settings common to every operation variant.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OperationSettings {
    pub credential_alias: Option<String>,
    pub credential_password: Option<String>,
    pub key_identifier: KeyIdentifier,
    pub parts: Vec<SecurityPart>,
}

impl fmt::Debug for OperationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSettings")
            .field("credential_alias", &self.credential_alias)
            .field(
                "credential_password",
                &self.credential_password.as_ref().map(|_| "<redacted>"),
            )
            .field("key_identifier", &self.key_identifier)
            .field("parts", &self.parts)
            .finish()
    }
}

impl OperationSettings {
    pub(crate) fn require_alias(&self, kind: OperationKind) -> Result<&str, WssError> {
        self.credential_alias
            .as_deref()
            .filter(|alias| !alias.is_empty())
            .ok_or_else(|| WssError::SecurityApply(format!("no credential alias configured for {}", kind)))
    }
}

/// A WS-Security strategy.
pub trait SecurityOperation {
    fn kind(&self) -> OperationKind;

    fn settings(&self) -> &OperationSettings;

    fn settings_mut(&mut self) -> &mut OperationSettings;

    /// Secure the configured parts of `document`, writing tokens into `header`.
    fn apply(
        &self,
        document: Document,
        crypto: &dyn Crypto,
        header: &SecurityHeader,
    ) -> Result<Document, WssError>;

    /// The labels this variant accepts.
    fn key_identifiers(&self) -> &'static KeyIdentifierRegistry {
        self.kind().key_identifier_scope().registry()
    }

    fn set_credential(&mut self, alias: &str, password: Option<&str>) {
        let settings = self.settings_mut();
        settings.credential_alias = Some(alias.to_string());
        settings.credential_password = password.map(str::to_string);
    }

    fn set_credential_alias(&mut self, alias: &str) {
        self.settings_mut().credential_alias = Some(alias.to_string());
    }

    fn credential_alias(&self) -> Option<&str> {
        self.settings().credential_alias.as_deref()
    }

    fn set_credential_password(&mut self, password: &str) {
        self.settings_mut().credential_password = Some(password.to_string());
    }

    fn credential_password(&self) -> Option<&str> {
        self.settings().credential_password.as_deref()
    }

    /// Select the key identifier by label. Labels outside this variant's
    /// table are configuration errors and leave the setting unchanged.
    fn set_key_identifier(&mut self, label: &str) -> Result<(), WssError> {
        let identifier = self.key_identifiers().identifier_for(label)?;
        self.settings_mut().key_identifier = identifier;
        Ok(())
    }

    fn key_identifier(&self) -> KeyIdentifier {
        self.settings().key_identifier
    }

    fn key_identifier_label(&self) -> Option<&'static str> {
        self.key_identifiers()
            .label_for(self.settings().key_identifier.code())
    }

    /// Clear the internal part list and refill it from `parts`.
    fn set_parts(&mut self, parts: &[SecurityPart]) {
        let list = &mut self.settings_mut().parts;
        list.clear();
        list.extend_from_slice(parts);
    }

    fn parts(&self) -> &[SecurityPart] {
        &self.settings().parts
    }
}

/// The configured operation of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsSecOperation {
    Signature(SignatureOperation),
    Encryption(EncryptionOperation),
}

impl Default for WsSecOperation {
    fn default() -> Self {
        Self::Signature(SignatureOperation::default())
    }
}

impl From<SignatureOperation> for WsSecOperation {
    fn from(operation: SignatureOperation) -> Self {
        Self::Signature(operation)
    }
}

impl From<EncryptionOperation> for WsSecOperation {
    fn from(operation: EncryptionOperation) -> Self {
        Self::Encryption(operation)
    }
}

impl SecurityOperation for WsSecOperation {
    fn kind(&self) -> OperationKind {
        match self {
            Self::Signature(op) => op.kind(),
            Self::Encryption(op) => op.kind(),
        }
    }

    fn settings(&self) -> &OperationSettings {
        match self {
            Self::Signature(op) => op.settings(),
            Self::Encryption(op) => op.settings(),
        }
    }

    fn settings_mut(&mut self) -> &mut OperationSettings {
        match self {
            Self::Signature(op) => op.settings_mut(),
            Self::Encryption(op) => op.settings_mut(),
        }
    }

    fn apply(
        &self,
        document: Document,
        crypto: &dyn Crypto,
        header: &SecurityHeader,
    ) -> Result<Document, WssError> {
        match self {
            Self::Signature(op) => op.apply(document, crypto, header),
            Self::Encryption(op) => op.apply(document, crypto, header),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parts::PartMode;

    #[test]
    fn test_credential_setters() {
        let mut op = WsSecOperation::from(SignatureOperation::new());
        op.set_credential("alice", Some("pw"));
        assert_eq!(op.credential_alias(), Some("alice"));
        assert_eq!(op.credential_password(), Some("pw"));

        op.set_credential_alias("bob");
        op.set_credential_password("other");
        assert_eq!(op.credential_alias(), Some("bob"));
        assert_eq!(op.credential_password(), Some("other"));
    }

    #[test]
    fn test_default_key_identifier_is_issuer_serial() {
        let op = WsSecOperation::from(EncryptionOperation::new());
        assert_eq!(op.key_identifier(), KeyIdentifier::IssuerSerial);
        assert_eq!(op.key_identifier_label(), Some("Issuer Name and Serial Number"));
    }

    #[test]
    fn test_key_identifier_scoped_per_variant() {
        let mut signature = WsSecOperation::from(SignatureOperation::new());
        let mut encryption = WsSecOperation::from(EncryptionOperation::new());

        assert!(signature.set_key_identifier("Key Value").is_ok());
        assert_eq!(signature.key_identifier(), KeyIdentifier::KeyValue);

        let err = encryption.set_key_identifier("Key Value").unwrap_err();
        assert!(err.is_configuration_error());
        // Rejected labels leave the previous choice in place
        assert_eq!(encryption.key_identifier(), KeyIdentifier::IssuerSerial);

        assert!(encryption.set_key_identifier("Encrypted Key SHA1").is_ok());
        assert!(signature.set_key_identifier("Encrypted Key SHA1").is_err());
    }

    #[test]
    fn test_unsupported_identifiers_are_configuration_errors() {
        let mut op = WsSecOperation::from(SignatureOperation::new());
        for label in ["Custom Key Identifier", "Endpoint Key Identifier", "bogus"] {
            let err = op.set_key_identifier(label).unwrap_err();
            assert!(err.is_configuration_error(), "{}", label);
        }
    }

    #[test]
    fn test_set_parts_replaces_list() {
        let mut op = WsSecOperation::from(SignatureOperation::new());
        op.set_parts(&[
            SecurityPart::new("A", None, PartMode::Element),
            SecurityPart::new("B", None, PartMode::Element),
        ]);
        op.set_parts(&[SecurityPart::new("C", None, PartMode::Content)]);
        let names: Vec<_> = op.parts().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["C"]);
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let mut op = SignatureOperation::new();
        op.set_credential("alice", Some("s3cret"));
        assert!(!format!("{:?}", op).contains("s3cret"));
    }
}
