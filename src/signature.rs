//! XML Signature over the selected parts (WS-Security X.509 token profile).

use crate::algorithm::{DigestAlgorithm, SignatureAlgorithm, EXC_C14N};
use crate::c14n;
use crate::crypto::Crypto;
use crate::document::{Document, Element, DSIG_NS, WSU_NS};
use crate::error::WssError;
use crate::header::SecurityHeader;
use crate::operation::{OperationKind, OperationSettings, SecurityOperation};
use crate::token::{self, new_id};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

/// Signs every element matched by the configured parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureOperation {
    settings: OperationSettings,
    signature_algorithm: SignatureAlgorithm,
    digest_algorithm: DigestAlgorithm,
}

impl SignatureOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    pub fn set_signature_algorithm(&mut self, algorithm: SignatureAlgorithm) {
        self.signature_algorithm = algorithm;
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn set_digest_algorithm(&mut self, algorithm: DigestAlgorithm) {
        self.digest_algorithm = algorithm;
    }

    fn reference(&self, id: &str, digest: &[u8]) -> Element {
        ds("Reference")
            .with_attribute("URI", format!("#{}", id))
            .with_child(ds("Transforms").with_child(ds("Transform").with_attribute("Algorithm", EXC_C14N)))
            .with_child(ds("DigestMethod").with_attribute("Algorithm", self.digest_algorithm.uri()))
            .with_child(ds("DigestValue").with_text(STANDARD.encode(digest)))
    }
}

fn ds(local_name: &str) -> Element {
    Element::new(Some("ds"), local_name, Some(DSIG_NS))
}

/// Return the element's `wsu:Id`, adding one if it has none.
fn ensure_wsu_id(document: &mut Document, path: &[usize]) -> Result<String, WssError> {
    let missing = || WssError::SecurityApply("signature target not found".to_string());
    let scope = document.scope_at(path).ok_or_else(missing)?;
    let element = document.element_mut(path).ok_or_else(missing)?;

    let existing = element.attributes.iter().find(|a| {
        a.local_name == "Id"
            && a.prefix
                .as_deref()
                .and_then(|p| scope.get(p))
                .map(String::as_str)
                == Some(WSU_NS)
    });
    if let Some(attribute) = existing {
        return Ok(attribute.value.clone());
    }

    let prefix = match scope
        .iter()
        .find(|(prefix, uri)| !prefix.is_empty() && uri.as_str() == WSU_NS)
    {
        Some((prefix, _)) => prefix.clone(),
        None => {
            element.declare_namespace("wsu", WSU_NS);
            "wsu".to_string()
        }
    };
    let id = new_id("id");
    element.set_attribute(&format!("{}:Id", prefix), id.as_str());
    Ok(id)
}

impl SecurityOperation for SignatureOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Signature
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
            debug!("No parts to sign");
            return Ok(document);
        }

        let alias = self.settings.require_alias(self.kind())?;
        let credential = crypto.certificate(alias)?;

        let mut ids: Vec<String> = Vec::new();
        for part in &self.settings.parts {
            let paths = part.locate(&document);
            if paths.is_empty() {
                return Err(WssError::SecurityApply(format!(
                    "no element matches signature part {}",
                    part
                )));
            }
            for path in paths {
                let id = ensure_wsu_id(&mut document, &path)?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        let key_reference = token::x509_reference(self.settings.key_identifier, &credential, crypto)?;
        if let Some(token) = key_reference.token.clone() {
            header.append(&mut document, token)?;
        }

        // Digests must be taken over the layout that gets serialized
        document.indent();

        let mut signed_info = ds("SignedInfo")
            .with_child(ds("CanonicalizationMethod").with_attribute("Algorithm", EXC_C14N))
            .with_child(ds("SignatureMethod").with_attribute("Algorithm", self.signature_algorithm.uri()));
        for id in &ids {
            let path = document
                .find_by_id(id)
                .ok_or_else(|| WssError::SecurityApply(format!("signed element '{}' not found", id)))?;
            let canonical = c14n::canonicalize(&document, &path)?;
            let digest = crypto.digest(self.digest_algorithm, &canonical)?;
            signed_info.push_child(self.reference(id, &digest));
        }

        let signature_id = new_id("SIG");
        let signature = ds("Signature")
            .with_namespace_decl("ds", DSIG_NS)
            .with_attribute("Id", signature_id.as_str())
            .with_child(signed_info)
            .with_child(ds("SignatureValue"))
            .with_child(key_reference.key_info());
        header.append(&mut document, signature)?;
        document.indent();

        let signature_path = document
            .find_by_id(&signature_id)
            .ok_or_else(|| WssError::SecurityApply("ds:Signature not found".to_string()))?;
        let mut signed_info_path = signature_path.clone();
        signed_info_path.push(0);
        let canonical = c14n::canonicalize(&document, &signed_info_path)?;
        let value = crypto.sign(
            alias,
            self.settings.credential_password.as_deref(),
            self.signature_algorithm,
            &canonical,
        )?;

        let mut signature_value_path = signature_path;
        signature_value_path.push(1);
        document
            .element_mut(&signature_value_path)
            .ok_or_else(|| WssError::SecurityApply("ds:SignatureValue not found".to_string()))?
            .set_text(STANDARD.encode(value));

        debug!(
            alias,
            references = ids.len(),
            key_identifier = %self.settings.key_identifier,
            algorithm = %self.signature_algorithm,
            "Signed document"
        );
        Ok(document)
    }
}
