//! Key identifier registry.
//!
//! Maps the operator-facing labels to the numeric key identifier codes used by
//! WSS4J (`WSConstants.BST_DIRECT_REFERENCE` and friends). There is one
//! general table and one table per operation variant; configuration setters
//! only accept labels from the variant table.

use crate::error::WssError;
use std::fmt;

/// A supported key identifier encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyIdentifier {
    BinarySecurityToken,
    IssuerSerial,
    X509Certificate,
    SubjectKeyIdentifier,
    ThumbprintSha1,
    EncryptedKeySha1,
    Custom,
    KeyValue,
    Endpoint,
}

impl KeyIdentifier {
    pub fn code(&self) -> u32 {
        match self {
            Self::BinarySecurityToken => 1,
            Self::IssuerSerial => 2,
            Self::X509Certificate => 3,
            Self::SubjectKeyIdentifier => 4,
            Self::ThumbprintSha1 => 8,
            Self::EncryptedKeySha1 => 10,
            Self::Custom => 12,
            Self::KeyValue => 13,
            Self::Endpoint => 14,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BinarySecurityToken => "Binary Security Token",
            Self::IssuerSerial => "Issuer Name and Serial Number",
            Self::X509Certificate => "X509 Certificate",
            Self::SubjectKeyIdentifier => "Subject Key Identifier",
            Self::ThumbprintSha1 => "Thumbprint SHA1 Identifier",
            Self::EncryptedKeySha1 => "Encrypted Key SHA1",
            Self::Custom => "Custom Key Identifier",
            Self::KeyValue => "Key Value",
            Self::Endpoint => "Endpoint Key Identifier",
        }
    }
}

impl Default for KeyIdentifier {
    fn default() -> Self {
        Self::IssuerSerial
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which table a lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIdentifierScope {
    General,
    Signature,
    Encryption,
}

impl fmt::Display for KeyIdentifierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Signature => write!(f, "signature"),
            Self::Encryption => write!(f, "encryption"),
        }
    }
}

/// An immutable label/code table.
#[derive(Debug)]
pub struct KeyIdentifierRegistry {
    scope: KeyIdentifierScope,
    entries: &'static [KeyIdentifier],
}

pub static GENERAL_KEY_IDENTIFIERS: KeyIdentifierRegistry = KeyIdentifierRegistry {
    scope: KeyIdentifierScope::General,
    entries: &[
        KeyIdentifier::BinarySecurityToken,
        KeyIdentifier::IssuerSerial,
        KeyIdentifier::X509Certificate,
        KeyIdentifier::SubjectKeyIdentifier,
        KeyIdentifier::ThumbprintSha1,
        KeyIdentifier::EncryptedKeySha1,
        KeyIdentifier::Custom,
        KeyIdentifier::KeyValue,
        KeyIdentifier::Endpoint,
    ],
};

pub static SIGNATURE_KEY_IDENTIFIERS: KeyIdentifierRegistry = KeyIdentifierRegistry {
    scope: KeyIdentifierScope::Signature,
    entries: &[
        KeyIdentifier::BinarySecurityToken,
        KeyIdentifier::IssuerSerial,
        KeyIdentifier::X509Certificate,
        KeyIdentifier::SubjectKeyIdentifier,
        KeyIdentifier::ThumbprintSha1,
        KeyIdentifier::KeyValue,
    ],
};

pub static ENCRYPTION_KEY_IDENTIFIERS: KeyIdentifierRegistry = KeyIdentifierRegistry {
    scope: KeyIdentifierScope::Encryption,
    entries: &[
        KeyIdentifier::BinarySecurityToken,
        KeyIdentifier::IssuerSerial,
        KeyIdentifier::X509Certificate,
        KeyIdentifier::SubjectKeyIdentifier,
        KeyIdentifier::ThumbprintSha1,
        KeyIdentifier::EncryptedKeySha1,
    ],
};

impl KeyIdentifierScope {
    pub fn registry(&self) -> &'static KeyIdentifierRegistry {
        match self {
            Self::General => &GENERAL_KEY_IDENTIFIERS,
            Self::Signature => &SIGNATURE_KEY_IDENTIFIERS,
            Self::Encryption => &ENCRYPTION_KEY_IDENTIFIERS,
        }
    }
}

impl KeyIdentifierRegistry {
    pub fn scope(&self) -> KeyIdentifierScope {
        self.scope
    }

    pub fn entries(&self) -> &'static [KeyIdentifier] {
        self.entries
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(KeyIdentifier::label)
    }

    pub fn label_for(&self, code: u32) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|k| k.code() == code)
            .map(KeyIdentifier::label)
    }

    pub fn identifier_for(&self, label: &str) -> Result<KeyIdentifier, WssError> {
        if let Some(identifier) = self.entries.iter().find(|k| k.label() == label) {
            return Ok(*identifier);
        }
        if GENERAL_KEY_IDENTIFIERS
            .entries
            .iter()
            .any(|k| k.label() == label)
        {
            return Err(WssError::Config(format!(
                "key identifier '{}' is not supported for {}",
                label, self.scope
            )));
        }
        Err(WssError::Config(format!("unknown key identifier '{}'", label)))
    }

    pub fn code_for(&self, label: &str) -> Result<u32, WssError> {
        self.identifier_for(label).map(|k| k.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_scope() {
        for registry in [
            &GENERAL_KEY_IDENTIFIERS,
            &SIGNATURE_KEY_IDENTIFIERS,
            &ENCRYPTION_KEY_IDENTIFIERS,
        ] {
            for identifier in registry.entries() {
                let label = registry.label_for(identifier.code()).unwrap();
                assert_eq!(registry.code_for(label).unwrap(), identifier.code());
            }
        }
    }

    #[test]
    fn test_general_scope_is_superset() {
        for registry in [&SIGNATURE_KEY_IDENTIFIERS, &ENCRYPTION_KEY_IDENTIFIERS] {
            for label in registry.labels() {
                assert!(GENERAL_KEY_IDENTIFIERS.code_for(label).is_ok());
            }
        }
        assert_eq!(GENERAL_KEY_IDENTIFIERS.entries().len(), 9);
    }

    #[test]
    fn test_codes_follow_wss4j() {
        assert_eq!(GENERAL_KEY_IDENTIFIERS.code_for("Binary Security Token").unwrap(), 1);
        assert_eq!(GENERAL_KEY_IDENTIFIERS.code_for("Thumbprint SHA1 Identifier").unwrap(), 8);
        assert_eq!(GENERAL_KEY_IDENTIFIERS.code_for("Endpoint Key Identifier").unwrap(), 14);
        assert_eq!(
            ENCRYPTION_KEY_IDENTIFIERS.label_for(10),
            Some("Encrypted Key SHA1")
        );
        assert_eq!(SIGNATURE_KEY_IDENTIFIERS.label_for(10), None);
    }

    #[test]
    fn test_out_of_scope_label() {
        let err = SIGNATURE_KEY_IDENTIFIERS
            .code_for("Encrypted Key SHA1")
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("not supported for signature"));

        let err = ENCRYPTION_KEY_IDENTIFIERS.code_for("Key Value").unwrap_err();
        assert!(err.to_string().contains("not supported for encryption"));
    }

    #[test]
    fn test_unknown_label() {
        for registry in [&GENERAL_KEY_IDENTIFIERS, &SIGNATURE_KEY_IDENTIFIERS] {
            let err = registry.code_for("Not A Real Identifier").unwrap_err();
            assert!(err.is_configuration_error());
            assert!(err.to_string().contains("unknown key identifier"));
        }
        // Labels are matched exactly
        assert!(GENERAL_KEY_IDENTIFIERS.code_for("x509 certificate").is_err());
    }
}
