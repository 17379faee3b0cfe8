//! WS-Security header insertion.

use crate::document::{Document, Element, ElementPath, SOAP_11_NS, SOAP_12_NS, WSSE_NS, WSU_NS};
use crate::error::WssError;
use crate::token::{new_id, wsse};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// SOAP version, detected from the Envelope namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    #[serde(rename = "1.1")]
    Soap11,
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    fn must_understand_value(&self) -> &'static str {
        match self {
            Self::Soap11 => "1",
            Self::Soap12 => "true",
        }
    }

    fn actor_attribute(&self) -> &'static str {
        match self {
            Self::Soap11 => "actor",
            Self::Soap12 => "role",
        }
    }
}

/// Location of the `wsse:Security` element inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeader {
    path: ElementPath,
    soap_version: SoapVersion,
}

impl SecurityHeader {
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn soap_version(&self) -> SoapVersion {
        self.soap_version
    }

    pub fn element<'d>(&self, document: &'d Document) -> Option<&'d Element> {
        document.element(&self.path)
    }

    /// Append a child to the security header.
    pub fn append(&self, document: &mut Document, child: Element) -> Result<(), WssError> {
        let security = document
            .element_mut(&self.path)
            .ok_or_else(|| WssError::SecurityApply("security header is missing".to_string()))?;
        security.push_child(child);
        Ok(())
    }
}

/// Inserts the security header an operation writes into.
pub trait SecurityHeaderBuilder: Send + Sync {
    fn insert_header(&self, document: &mut Document) -> Result<SecurityHeader, WssError>;
}

/// Builds a `wsse:Security` header as the first SOAP header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsseHeaderBuilder {
    pub must_understand: bool,
    /// SOAP 1.1 actor / SOAP 1.2 role
    pub actor: Option<String>,
    /// Adds a `wsu:Timestamp` expiring after this many seconds
    pub timestamp_ttl_secs: Option<u64>,
}

impl Default for WsseHeaderBuilder {
    fn default() -> Self {
        Self {
            must_understand: true,
            actor: None,
            timestamp_ttl_secs: None,
        }
    }
}

impl WsseHeaderBuilder {
    fn timestamp(&self, ttl_secs: u64) -> Element {
        let created = Utc::now();
        let expires = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| created.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Element::new(Some("wsu"), "Timestamp", Some(WSU_NS))
            .with_attribute("wsu:Id", new_id("TS"))
            .with_child(
                Element::new(Some("wsu"), "Created", Some(WSU_NS))
                    .with_text(created.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
            .with_child(
                Element::new(Some("wsu"), "Expires", Some(WSU_NS))
                    .with_text(expires.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
    }

    fn matches_actor(&self, element: &Element, version: SoapVersion) -> bool {
        let actor = element
            .attributes
            .iter()
            .find(|a| a.local_name == version.actor_attribute())
            .map(|a| a.value.as_str());
        actor == self.actor.as_deref()
    }
}

impl SecurityHeaderBuilder for WsseHeaderBuilder {
    fn insert_header(&self, document: &mut Document) -> Result<SecurityHeader, WssError> {
        let root = document.root_mut();
        let soap_version = match root.namespace.as_deref() {
            Some(SOAP_11_NS) if root.local_name == "Envelope" => SoapVersion::Soap11,
            Some(SOAP_12_NS) if root.local_name == "Envelope" => SoapVersion::Soap12,
            _ => {
                return Err(WssError::InvalidEnvelope(format!(
                    "root element '{}' is not a SOAP Envelope",
                    root.qualified_name()
                )))
            }
        };
        let soap_ns = soap_version.namespace();

        let existing = root.child_elements().position(|e| e.is(soap_ns, "Header"));
        let header_index = match existing {
            Some(index) => index,
            None => {
                if root.first_child(soap_ns, "Body").is_none() {
                    return Err(WssError::InvalidEnvelope("envelope has no Body".to_string()));
                }
                let header = Element::new(root.prefix.as_deref(), "Header", Some(soap_ns));
                root.insert_child_element(0, header);
                0
            }
        };
        let envelope_prefix = root.prefix.clone();

        let header = root
            .child_element_mut(header_index)
            .ok_or_else(|| WssError::InvalidEnvelope("SOAP Header vanished".to_string()))?;

        if let Some(index) = header
            .child_elements()
            .position(|e| e.is(WSSE_NS, "Security") && self.matches_actor(e, soap_version))
        {
            debug!("Reusing existing wsse:Security header");
            return Ok(SecurityHeader {
                path: vec![header_index, index],
                soap_version,
            });
        }

        let mut security = wsse("Security")
            .with_namespace_decl("wsse", WSSE_NS)
            .with_namespace_decl("wsu", WSU_NS);

        // SOAP attributes on the header block need a prefix bound to the
        // envelope namespace
        let soap_prefix = match envelope_prefix {
            Some(prefix) => prefix,
            None => {
                security.declare_namespace("soapenv", soap_ns);
                "soapenv".to_string()
            }
        };
        if self.must_understand {
            security.set_attribute(
                &format!("{}:mustUnderstand", soap_prefix),
                soap_version.must_understand_value(),
            );
        }
        if let Some(actor) = &self.actor {
            security.set_attribute(
                &format!("{}:{}", soap_prefix, soap_version.actor_attribute()),
                actor.as_str(),
            );
        }
        if let Some(ttl) = self.timestamp_ttl_secs {
            security.push_child(self.timestamp(ttl));
        }

        header.insert_child_element(0, security);
        debug!(
            soap_version = ?soap_version,
            must_understand = self.must_understand,
            actor = ?self.actor,
            "Inserted wsse:Security header"
        );

        Ok(SecurityHeader {
            path: vec![header_index, 0],
            soap_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP11_NO_HEADER: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><Ping/></soap:Body></soap:Envelope>"#;

    #[test]
    fn test_creates_header_before_body() {
        let mut doc = Document::parse(SOAP11_NO_HEADER).unwrap();
        let header = WsseHeaderBuilder::default().insert_header(&mut doc).unwrap();

        assert_eq!(header.path(), &[0, 0]);
        assert_eq!(header.soap_version(), SoapVersion::Soap11);
        let names: Vec<_> = doc.root().child_elements().map(|e| e.local_name.clone()).collect();
        assert_eq!(names, vec!["Header", "Body"]);

        let security = header.element(&doc).unwrap();
        assert!(security.is(WSSE_NS, "Security"));
        assert_eq!(security.attribute("soap:mustUnderstand"), Some("1"));
        assert_eq!(security.child_elements().count(), 0);

        let xml = doc.to_xml_string().unwrap();
        assert!(xml.contains("<soap:Header><wsse:Security"));
    }

    #[test]
    fn test_security_goes_first_in_existing_header() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header><Trace xmlns="urn:t"/></soap:Header><soap:Body/></soap:Envelope>"#;
        let mut doc = Document::parse(xml).unwrap();
        let header = WsseHeaderBuilder::default().insert_header(&mut doc).unwrap();
        assert_eq!(header.path(), &[0, 0]);
        let soap_header = doc.element(&[0]).unwrap();
        assert_eq!(soap_header.child_element(1).unwrap().local_name, "Trace");
    }

    #[test]
    fn test_soap12_default_namespace_envelope() {
        let xml = r#"<Envelope xmlns="http://www.w3.org/2003/05/soap-envelope"><Body/></Envelope>"#;
        let mut doc = Document::parse(xml).unwrap();
        let builder = WsseHeaderBuilder {
            actor: Some("urn:gateway".to_string()),
            ..Default::default()
        };
        let header = builder.insert_header(&mut doc).unwrap();
        assert_eq!(header.soap_version(), SoapVersion::Soap12);

        let security = header.element(&doc).unwrap();
        assert_eq!(security.attribute("soapenv:mustUnderstand"), Some("true"));
        assert_eq!(security.attribute("soapenv:role"), Some("urn:gateway"));

        // Serializes with every prefix bound
        let out = doc.to_xml_string().unwrap();
        assert!(Document::parse(&out).is_ok());
    }

    #[test]
    fn test_existing_security_header_reused() {
        let mut doc = Document::parse(SOAP11_NO_HEADER).unwrap();
        let builder = WsseHeaderBuilder::default();
        let first = builder.insert_header(&mut doc).unwrap();
        let second = builder.insert_header(&mut doc).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc.element(&[0]).unwrap().child_elements().count(), 1);
    }

    #[test]
    fn test_timestamp() {
        let mut doc = Document::parse(SOAP11_NO_HEADER).unwrap();
        let builder = WsseHeaderBuilder {
            timestamp_ttl_secs: Some(300),
            ..Default::default()
        };
        let header = builder.insert_header(&mut doc).unwrap();
        let timestamp = header.element(&doc).unwrap().first_child(WSU_NS, "Timestamp").unwrap();
        let created = timestamp.first_child(WSU_NS, "Created").unwrap().text();
        let expires = timestamp.first_child(WSU_NS, "Expires").unwrap().text();

        let created = chrono::DateTime::parse_from_rfc3339(&created).unwrap();
        let expires = chrono::DateTime::parse_from_rfc3339(&expires).unwrap();
        assert_eq!((expires - created).num_seconds(), 300);
    }

    #[test]
    fn test_must_understand_can_be_disabled() {
        let mut doc = Document::parse(SOAP11_NO_HEADER).unwrap();
        let builder = WsseHeaderBuilder {
            must_understand: false,
            ..Default::default()
        };
        let header = builder.insert_header(&mut doc).unwrap();
        assert!(header.element(&doc).unwrap().attributes.is_empty());
    }

    #[test]
    fn test_rejects_non_soap_root() {
        let mut doc = Document::parse("<order><item/></order>").unwrap();
        let err = WsseHeaderBuilder::default().insert_header(&mut doc).unwrap_err();
        assert!(matches!(err, WssError::InvalidEnvelope(_)));
    }
}
