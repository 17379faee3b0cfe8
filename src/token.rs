//! Security token references: the `ds:KeyInfo` content that tells the
//! receiver which certificate a signature or encrypted key belongs to.

use crate::crypto::{Crypto, X509Credential};
use crate::algorithm::DigestAlgorithm;
use crate::document::{Element, DSIG_NS, WSSE_NS, WSU_NS};
use crate::error::WssError;
use crate::key_identifier::KeyIdentifier;
use base64::{engine::general_purpose::STANDARD, Engine};

pub const BASE64_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
pub const X509V3_VALUE_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";
pub const SKI_VALUE_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509SubjectKeyIdentifier";
pub const THUMBPRINT_VALUE_TYPE: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-soap-message-security-1.1#ThumbprintSHA1";
pub const ENCRYPTED_KEY_SHA1_VALUE_TYPE: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-soap-message-security-1.1#EncryptedKeySHA1";

/// A fresh document-unique identifier such as `SIG-4F0C...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{:032X}", prefix, rand::random::<u128>())
}

/// How a key is referenced from `ds:KeyInfo`.
#[derive(Debug, Clone)]
pub struct KeyReference {
    /// Token that must be placed in the security header, if any
    pub token: Option<Element>,
    /// Child of `ds:KeyInfo`
    pub key_info_content: Element,
}

impl KeyReference {
    /// `ds:KeyInfo` wrapping the reference.
    pub fn key_info(&self) -> Element {
        Element::new(Some("ds"), "KeyInfo", Some(DSIG_NS))
            .with_namespace_decl("ds", DSIG_NS)
            .with_attribute("Id", new_id("KI"))
            .with_child(self.key_info_content.clone())
    }
}

pub(crate) fn wsse(local_name: &str) -> Element {
    Element::new(Some("wsse"), local_name, Some(WSSE_NS))
}

fn ds(local_name: &str) -> Element {
    Element::new(Some("ds"), local_name, Some(DSIG_NS))
}

fn security_token_reference() -> Element {
    wsse("SecurityTokenReference")
        .with_namespace_decl("wsse", WSSE_NS)
        .with_namespace_decl("wsu", WSU_NS)
        .with_attribute("wsu:Id", new_id("STR"))
}

fn key_identifier(value_type: &str, value: &[u8]) -> Element {
    wsse("KeyIdentifier")
        .with_attribute("EncodingType", BASE64_ENCODING)
        .with_attribute("ValueType", value_type)
        .with_text(STANDARD.encode(value))
}

/// Build the reference to `credential` for the chosen identifier.
pub fn x509_reference(
    identifier: KeyIdentifier,
    credential: &X509Credential,
    crypto: &dyn Crypto,
) -> Result<KeyReference, WssError> {
    let (token, key_info_content) = match identifier {
        KeyIdentifier::BinarySecurityToken => {
            let token_id = new_id("X509");
            let token = wsse("BinarySecurityToken")
                .with_namespace_decl("wsse", WSSE_NS)
                .with_namespace_decl("wsu", WSU_NS)
                .with_attribute("EncodingType", BASE64_ENCODING)
                .with_attribute("ValueType", X509V3_VALUE_TYPE)
                .with_attribute("wsu:Id", token_id.as_str())
                .with_text(STANDARD.encode(&credential.certificate_der));
            let reference = security_token_reference().with_child(
                wsse("Reference")
                    .with_attribute("URI", format!("#{}", token_id))
                    .with_attribute("ValueType", X509V3_VALUE_TYPE),
            );
            (Some(token), reference)
        }
        KeyIdentifier::IssuerSerial => {
            let issuer_serial = ds("X509IssuerSerial")
                .with_child(ds("X509IssuerName").with_text(credential.issuer_name.as_str()))
                .with_child(ds("X509SerialNumber").with_text(credential.serial_number.as_str()));
            let reference = security_token_reference().with_child(
                ds("X509Data")
                    .with_namespace_decl("ds", DSIG_NS)
                    .with_child(issuer_serial),
            );
            (None, reference)
        }
        KeyIdentifier::X509Certificate => (
            None,
            security_token_reference()
                .with_child(key_identifier(X509V3_VALUE_TYPE, &credential.certificate_der)),
        ),
        KeyIdentifier::SubjectKeyIdentifier => (
            None,
            security_token_reference()
                .with_child(key_identifier(SKI_VALUE_TYPE, &credential.subject_key_identifier)),
        ),
        KeyIdentifier::ThumbprintSha1 => {
            let thumbprint = crypto.digest(DigestAlgorithm::Sha1, &credential.certificate_der)?;
            (
                None,
                security_token_reference().with_child(key_identifier(THUMBPRINT_VALUE_TYPE, &thumbprint)),
            )
        }
        KeyIdentifier::KeyValue => {
            let key_value = credential.key_value.as_ref().ok_or_else(|| {
                WssError::SecurityApply(format!(
                    "certificate '{}' has no RSA key value",
                    credential.alias
                ))
            })?;
            let rsa_key_value = ds("RSAKeyValue")
                .with_child(ds("Modulus").with_text(STANDARD.encode(&key_value.modulus)))
                .with_child(ds("Exponent").with_text(STANDARD.encode(&key_value.exponent)));
            (
                None,
                ds("KeyValue")
                    .with_namespace_decl("ds", DSIG_NS)
                    .with_child(rsa_key_value),
            )
        }
        other => {
            return Err(WssError::SecurityApply(format!(
                "key identifier '{}' cannot reference an X.509 certificate",
                other
            )))
        }
    };

    Ok(KeyReference {
        token,
        key_info_content,
    })
}

/// Reference to an `xenc:EncryptedKey` by id.
pub fn encrypted_key_reference(encrypted_key_id: &str) -> Element {
    security_token_reference().with_child(
        wsse("Reference").with_attribute("URI", format!("#{}", encrypted_key_id)),
    )
}

/// Reference to an `xenc:EncryptedKey` by the SHA-1 of its cipher value.
pub fn encrypted_key_sha1_reference(cipher_value_sha1: &[u8]) -> Element {
    security_token_reference()
        .with_child(key_identifier(ENCRYPTED_KEY_SHA1_VALUE_TYPE, cipher_value_sha1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaKeyValue;
    use crate::document::Document;
    use crate::keystore::Keystore;

    fn alice() -> (Keystore, X509Credential) {
        let keystore = Keystore::from_pem(include_str!("../tests/fixtures/alice.pem"), None).unwrap();
        let credential = keystore.certificate("alice").unwrap();
        (keystore, credential)
    }

    fn render(element: Element) -> String {
        Document::new(element).to_xml_string().unwrap()
    }

    #[test]
    fn test_new_id_is_unique_ncname() {
        let a = new_id("SIG");
        let b = new_id("SIG");
        assert_ne!(a, b);
        assert!(a.starts_with("SIG-"));
        assert_eq!(a.len(), 4 + 32);
    }

    #[test]
    fn test_binary_security_token_reference() {
        let (keystore, credential) = alice();
        let reference = x509_reference(KeyIdentifier::BinarySecurityToken, &credential, &keystore).unwrap();

        let token = reference.token.clone().unwrap();
        let token_id = token.attribute("wsu:Id").unwrap().to_string();
        assert_eq!(token.text(), STANDARD.encode(&credential.certificate_der));

        let xml = render(reference.key_info());
        assert!(xml.contains(&format!(r##"URI="#{}""##, token_id)));
    }

    #[test]
    fn test_issuer_serial_reference() {
        let (keystore, credential) = alice();
        let reference = x509_reference(KeyIdentifier::IssuerSerial, &credential, &keystore).unwrap();
        assert!(reference.token.is_none());

        let xml = render(reference.key_info());
        assert!(xml.contains(
            "<ds:X509SerialNumber>48901423849452649988314608489102956335559919071</ds:X509SerialNumber>"
        ));
        assert!(xml.contains("CN=alice"));
    }

    #[test]
    fn test_key_identifier_values() {
        let (keystore, credential) = alice();

        let ski = render(
            x509_reference(KeyIdentifier::SubjectKeyIdentifier, &credential, &keystore)
                .unwrap()
                .key_info_content,
        );
        assert!(ski.contains("#X509SubjectKeyIdentifier\">y2k4U5oRTmGtm32HL1Ao/DmP+R8=<"));

        let thumbprint = render(
            x509_reference(KeyIdentifier::ThumbprintSha1, &credential, &keystore)
                .unwrap()
                .key_info_content,
        );
        assert!(thumbprint.contains("#ThumbprintSHA1\">Lqjxlr4toLzBU/o2nOiDOZPQaJw=<"));
    }

    #[test]
    fn test_key_value_reference() {
        let (keystore, mut credential) = alice();
        let xml = render(
            x509_reference(KeyIdentifier::KeyValue, &credential, &keystore)
                .unwrap()
                .key_info(),
        );
        assert!(xml.contains("<ds:Exponent>AQAB</ds:Exponent>"));
        assert!(!xml.contains("SecurityTokenReference"));

        credential.key_value = None::<RsaKeyValue>;
        assert!(x509_reference(KeyIdentifier::KeyValue, &credential, &keystore).is_err());
    }

    #[test]
    fn test_non_certificate_identifiers_rejected() {
        let (keystore, credential) = alice();
        for identifier in [
            KeyIdentifier::EncryptedKeySha1,
            KeyIdentifier::Custom,
            KeyIdentifier::Endpoint,
        ] {
            let err = x509_reference(identifier, &credential, &keystore).unwrap_err();
            assert!(matches!(err, WssError::SecurityApply(_)));
        }
    }
}
