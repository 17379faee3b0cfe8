//! XML Encryption of the selected parts with a wrapped session key.

use crate::algorithm::{DigestAlgorithm, KeyTransportAlgorithm, SymmetricAlgorithm};
use crate::c14n;
use crate::crypto::Crypto;
use crate::document::{Document, Element, Node, DSIG_NS, XENC_NS};
use crate::error::WssError;
use crate::header::SecurityHeader;
use crate::key_identifier::KeyIdentifier;
use crate::operation::{OperationKind, OperationSettings, SecurityOperation};
use crate::parts::PartMode;
use crate::token::{self, new_id};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

pub const ELEMENT_TYPE: &str = "http://www.w3.org/2001/04/xmlenc#Element";
pub const CONTENT_TYPE: &str = "http://www.w3.org/2001/04/xmlenc#Content";

/// Encrypts every element matched by the configured parts for the
/// certificate named by the credential alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionOperation {
    settings: OperationSettings,
    symmetric_algorithm: SymmetricAlgorithm,
    key_transport_algorithm: KeyTransportAlgorithm,
}

fn xenc(local_name: &str) -> Element {
    Element::new(Some("xenc"), local_name, Some(XENC_NS))
}

fn cipher_data(value: &[u8]) -> Element {
    xenc("CipherData").with_child(xenc("CipherValue").with_text(STANDARD.encode(value)))
}

impl EncryptionOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symmetric_algorithm(&self) -> SymmetricAlgorithm {
        self.symmetric_algorithm
    }

    pub fn set_symmetric_algorithm(&mut self, algorithm: SymmetricAlgorithm) {
        self.symmetric_algorithm = algorithm;
    }

    pub fn key_transport_algorithm(&self) -> KeyTransportAlgorithm {
        self.key_transport_algorithm
    }

    pub fn set_key_transport_algorithm(&mut self, algorithm: KeyTransportAlgorithm) {
        self.key_transport_algorithm = algorithm;
    }

    fn encrypted_data(&self, id: &str, mode: PartMode, key_info_content: Element, cipher: &[u8]) -> Element {
        let data_type = match mode {
            PartMode::Element => ELEMENT_TYPE,
            PartMode::Content => CONTENT_TYPE,
        };
        xenc("EncryptedData")
            .with_namespace_decl("xenc", XENC_NS)
            .with_attribute("Id", id)
            .with_attribute("Type", data_type)
            .with_child(xenc("EncryptionMethod").with_attribute("Algorithm", self.symmetric_algorithm.uri()))
            .with_child(
                Element::new(Some("ds"), "KeyInfo", Some(DSIG_NS))
                    .with_namespace_decl("ds", DSIG_NS)
                    .with_child(key_info_content),
            )
            .with_child(cipher_data(cipher))
    }

    fn encryption_method(&self) -> Element {
        let method = xenc("EncryptionMethod").with_attribute("Algorithm", self.key_transport_algorithm.uri());
        match self.key_transport_algorithm.oaep_digest() {
            Some(digest) => method.with_child(
                Element::new(Some("ds"), "DigestMethod", Some(DSIG_NS))
                    .with_namespace_decl("ds", DSIG_NS)
                    .with_attribute("Algorithm", digest.uri()),
            ),
            None => method,
        }
    }
}

impl SecurityOperation for EncryptionOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Encryption
    }

    fn settings(&self) -> &OperationSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut OperationSettings {
        &mut self.settings
    }

    fn apply(
        &self,
        mut document: Document,
        crypto: &dyn Crypto,
        header: &SecurityHeader,
    ) -> Result<Document, WssError> {
        if self.settings.parts.is_empty() {
            debug!("No parts to encrypt");
            return Ok(document);
        }

        let alias = self.settings.require_alias(self.kind())?;
        let credential = crypto.certificate(alias)?;

        let session_key = crypto.generate_key(self.symmetric_algorithm)?;
        let wrapped_key = crypto.encrypt_key(alias, self.key_transport_algorithm, &session_key)?;
        let encrypted_key_id = new_id("EK");

        let data_key_reference = match self.settings.key_identifier {
            KeyIdentifier::EncryptedKeySha1 => {
                token::encrypted_key_sha1_reference(&crypto.digest(DigestAlgorithm::Sha1, &wrapped_key)?)
            }
            _ => token::encrypted_key_reference(&encrypted_key_id),
        };

        let mut data_ids: Vec<String> = Vec::new();
        for part in &self.settings.parts {
            let paths = part.locate(&document);
            if paths.is_empty() {
                return Err(WssError::SecurityApply(format!(
                    "no element matches encryption part {}",
                    part
                )));
            }

            // Last match first, so earlier paths stay valid and nested
            // matches are encrypted before their ancestors
            let mut part_ids = Vec::with_capacity(paths.len());
            for path in paths.iter().rev() {
                let plaintext = match part.mode {
                    PartMode::Element => c14n::canonicalize(&document, path)?,
                    PartMode::Content => c14n::canonicalize_content(&document, path)?,
                };
                let cipher = crypto.encrypt_data(self.symmetric_algorithm, &session_key, &plaintext)?;
                let data_id = new_id("ED");
                let encrypted = self.encrypted_data(&data_id, part.mode, data_key_reference.clone(), &cipher);

                match (part.mode, path.split_last()) {
                    (PartMode::Element, Some((&index, parent))) => {
                        document
                            .element_mut(parent)
                            .and_then(|p| p.replace_child_element(index, encrypted))
                            .ok_or_else(|| WssError::SecurityApply("encryption target not found".to_string()))?;
                    }
                    (PartMode::Element, None) => {
                        return Err(WssError::SecurityApply(
                            "the document element cannot be encrypted".to_string(),
                        ))
                    }
                    (PartMode::Content, _) => {
                        let element = document
                            .element_mut(path)
                            .ok_or_else(|| WssError::SecurityApply("encryption target not found".to_string()))?;
                        element.children = vec![Node::Element(encrypted)];
                    }
                }
                part_ids.push(data_id);
            }
            data_ids.extend(part_ids.into_iter().rev());
        }

        // The EncryptedKey itself still needs a certificate reference
        let key_identifier = match self.settings.key_identifier {
            KeyIdentifier::EncryptedKeySha1 => KeyIdentifier::IssuerSerial,
            other => other,
        };
        let key_reference = token::x509_reference(key_identifier, &credential, crypto)?;
        if let Some(token) = key_reference.token.clone() {
            header.append(&mut document, token)?;
        }

        let mut reference_list = xenc("ReferenceList");
        for id in &data_ids {
            reference_list.push_child(xenc("DataReference").with_attribute("URI", format!("#{}", id)));
        }
        let encrypted_key = xenc("EncryptedKey")
            .with_namespace_decl("xenc", XENC_NS)
            .with_attribute("Id", encrypted_key_id.as_str())
            .with_child(self.encryption_method())
            .with_child(key_reference.key_info())
            .with_child(cipher_data(&wrapped_key))
            .with_child(reference_list);
        header.append(&mut document, encrypted_key)?;

        debug!(
            alias,
            encrypted = data_ids.len(),
            key_identifier = %self.settings.key_identifier,
            algorithm = %self.symmetric_algorithm,
            key_transport = %self.key_transport_algorithm,
            "Encrypted document"
        );
        Ok(document)
    }
}
