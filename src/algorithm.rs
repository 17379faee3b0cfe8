//! XML Signature / XML Encryption algorithm identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exclusive XML Canonicalization 1.0 (omits comments).
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Signature method for `ds:SignatureMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    #[default]
    RsaSha1,
    RsaSha256,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    /// The digest the RSA PKCS#1 v1.5 signature is computed over.
    pub fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::RsaSha512 => "rsa-sha512",
        };
        write!(f, "{}", name)
    }
}

/// Digest method for `ds:DigestMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            Self::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        };
        write!(f, "{}", name)
    }
}

/// Block cipher for `xenc:EncryptedData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetricAlgorithm {
    #[default]
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl SymmetricAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
            Self::Aes192Cbc => "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
            Self::Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
        }
    }

    /// Session key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aes128Cbc => "aes128-cbc",
            Self::Aes192Cbc => "aes192-cbc",
            Self::Aes256Cbc => "aes256-cbc",
        };
        write!(f, "{}", name)
    }
}

/// Key transport for `xenc:EncryptedKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyTransportAlgorithm {
    #[serde(rename = "rsa-1_5")]
    Rsa15,
    #[default]
    RsaOaepMgf1p,
}

impl KeyTransportAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Rsa15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
            Self::RsaOaepMgf1p => "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
        }
    }

    /// OAEP carries its digest as a `ds:DigestMethod` child of the
    /// encryption method.
    pub fn oaep_digest(&self) -> Option<DigestAlgorithm> {
        match self {
            Self::Rsa15 => None,
            Self::RsaOaepMgf1p => Some(DigestAlgorithm::Sha1),
        }
    }
}

impl fmt::Display for KeyTransportAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rsa15 => "rsa-1_5",
            Self::RsaOaepMgf1p => "rsa-oaep-mgf1p",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wss4j() {
        assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::RsaSha1);
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha1);
        assert_eq!(SymmetricAlgorithm::default(), SymmetricAlgorithm::Aes128Cbc);
        assert_eq!(
            KeyTransportAlgorithm::default(),
            KeyTransportAlgorithm::RsaOaepMgf1p
        );
    }

    #[test]
    fn test_serde_names() {
        let alg: SymmetricAlgorithm = serde_yaml::from_str("aes256-cbc").unwrap();
        assert_eq!(alg, SymmetricAlgorithm::Aes256Cbc);
        assert_eq!(alg.key_len(), 32);

        let kt: KeyTransportAlgorithm = serde_yaml::from_str("rsa-1_5").unwrap();
        assert_eq!(kt, KeyTransportAlgorithm::Rsa15);
        assert!(kt.oaep_digest().is_none());

        let sig: SignatureAlgorithm = serde_yaml::from_str("rsa-sha256").unwrap();
        assert_eq!(sig.digest(), DigestAlgorithm::Sha256);
    }

    #[test]
    fn test_display_matches_serde_name() {
        assert_eq!(SignatureAlgorithm::RsaSha512.to_string(), "rsa-sha512");
        assert_eq!(KeyTransportAlgorithm::RsaOaepMgf1p.to_string(), "rsa-oaep-mgf1p");
    }
}
