//! Exclusive XML Canonicalization 1.0, without comments.
//!
//! Works on a subtree of a parsed [`Document`]. Only namespaces visibly
//! utilized by an element (its own prefix and its attribute prefixes) are
//! rendered, and only where the nearest rendered ancestor does not already
//! carry the same binding.

use crate::document::{base_scope, Attribute, Document, Element, NamespaceScope, Node, XML_NS};
use crate::error::WssError;
use std::collections::BTreeSet;

/// Canonical form of the element at `path`.
pub fn canonicalize(document: &Document, path: &[usize]) -> Result<Vec<u8>, WssError> {
    let element = document
        .element(path)
        .ok_or_else(|| WssError::SecurityApply("canonicalization target not found".to_string()))?;
    let inherited = inherited_scope(document, path)?;

    let mut out = String::new();
    render_element(element, &inherited, &NamespaceScope::new(), &mut out)?;
    Ok(out.into_bytes())
}

/// Canonical form of the children of the element at `path`, each element
/// child canonicalized as its own apex.
pub fn canonicalize_content(document: &Document, path: &[usize]) -> Result<Vec<u8>, WssError> {
    let element = document
        .element(path)
        .ok_or_else(|| WssError::SecurityApply("canonicalization target not found".to_string()))?;
    let scope = document
        .scope_at(path)
        .ok_or_else(|| WssError::SecurityApply("canonicalization target not found".to_string()))?;

    let mut out = String::new();
    for child in &element.children {
        render_node(child, &scope, &NamespaceScope::new(), &mut out)?;
    }
    Ok(out.into_bytes())
}

fn inherited_scope(document: &Document, path: &[usize]) -> Result<NamespaceScope, WssError> {
    match path.split_last() {
        Some((_, parent)) => document
            .scope_at(parent)
            .ok_or_else(|| WssError::SecurityApply("canonicalization target not found".to_string())),
        None => Ok(base_scope()),
    }
}

fn attribute_namespace<'a>(attribute: &Attribute, scope: &'a NamespaceScope) -> &'a str {
    match attribute.prefix.as_deref() {
        None => "",
        Some("xml") => XML_NS,
        Some(p) => scope.get(p).map(String::as_str).unwrap_or(""),
    }
}

fn render_element(
    element: &Element,
    inherited: &NamespaceScope,
    rendered: &NamespaceScope,
    out: &mut String,
) -> Result<(), WssError> {
    let mut scope = inherited.clone();
    for (prefix, uri) in &element.namespace_decls {
        scope.insert(prefix.clone(), uri.clone());
    }

    let mut utilized: BTreeSet<&str> = BTreeSet::new();
    utilized.insert(element.prefix.as_deref().unwrap_or(""));
    for attribute in &element.attributes {
        if let Some(p) = attribute.prefix.as_deref() {
            if p != "xml" {
                utilized.insert(p);
            }
        }
    }

    let mut now_rendered = rendered.clone();
    let mut namespaces = Vec::new();
    for prefix in utilized {
        let uri = scope.get(prefix).map(String::as_str).unwrap_or("");
        if !prefix.is_empty() && uri.is_empty() {
            return Err(WssError::Serialize(format!(
                "unbound namespace prefix '{}' during canonicalization",
                prefix
            )));
        }
        let already = rendered.get(prefix).map(String::as_str);
        let emit = if prefix.is_empty() {
            already.unwrap_or("") != uri
        } else {
            already != Some(uri)
        };
        if emit {
            namespaces.push((prefix, uri));
            now_rendered.insert(prefix.to_string(), uri.to_string());
        }
    }

    let mut attributes: Vec<(&str, &Attribute)> = element
        .attributes
        .iter()
        .map(|a| (attribute_namespace(a, &scope), a))
        .collect();
    attributes.sort_by(|a, b| (a.0, a.1.local_name.as_str()).cmp(&(b.0, b.1.local_name.as_str())));

    let name = element.qualified_name();
    out.push('<');
    out.push_str(&name);
    for (prefix, uri) in namespaces {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attribute(uri, out);
        out.push('"');
    }
    for (_, attribute) in attributes {
        out.push(' ');
        out.push_str(&attribute.qualified_name());
        out.push_str("=\"");
        escape_attribute(&attribute.value, out);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        render_node(child, &scope, &now_rendered, out)?;
    }

    out.push_str("</");
    out.push_str(&name);
    out.push('>');
    Ok(())
}

fn render_node(
    node: &Node,
    scope: &NamespaceScope,
    rendered: &NamespaceScope,
    out: &mut String,
) -> Result<(), WssError> {
    match node {
        Node::Element(e) => render_element(e, scope, rendered, out)?,
        Node::Text(t) | Node::CData(t) => escape_text(t, out),
        Node::ProcessingInstruction(pi) => {
            out.push_str("<?");
            out.push_str(pi);
            out.push_str("?>");
        }
        Node::Comment(_) => {}
    }
    Ok(())
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str, local_name: &str) -> String {
        let doc = Document::parse(xml).unwrap();
        let path = doc.find_elements(None, local_name).remove(0);
        String::from_utf8(canonicalize(&doc, &path).unwrap()).unwrap()
    }

    #[test]
    fn test_only_utilized_namespaces_rendered() {
        let xml = r#"<soap:Envelope xmlns:soap="urn:soap" xmlns:unused="urn:unused"><soap:Body><m:Op xmlns:m="urn:m"/></soap:Body></soap:Envelope>"#;
        assert_eq!(
            c14n(xml, "Body"),
            r#"<soap:Body xmlns:soap="urn:soap"><m:Op xmlns:m="urn:m"></m:Op></soap:Body>"#
        );
    }

    #[test]
    fn test_binding_not_repeated_in_descendants() {
        let xml = r#"<a:r xmlns:a="urn:a"><a:x><a:y/></a:x></a:r>"#;
        assert_eq!(
            c14n(xml, "r"),
            r#"<a:r xmlns:a="urn:a"><a:x><a:y></a:y></a:x></a:r>"#
        );
    }

    #[test]
    fn test_attributes_sorted_by_namespace_then_name() {
        let xml = r#"<r xmlns:z="urn:a" xmlns:b="urn:b" b:attr="1" z:attr="2" plain="3" alpha="4"/>"#;
        assert_eq!(
            c14n(xml, "r"),
            r#"<r xmlns:b="urn:b" xmlns:z="urn:a" alpha="4" plain="3" z:attr="2" b:attr="1"></r>"#
        );
    }

    #[test]
    fn test_default_namespace_undeclared_when_needed() {
        let xml = r#"<r xmlns="urn:d"><inner xmlns=""><leaf/></inner></r>"#;
        assert_eq!(c14n(xml, "r"), r#"<r xmlns="urn:d"><inner xmlns=""><leaf></leaf></inner></r>"#);
        // Apex without a default namespace emits no xmlns=""
        assert_eq!(c14n(xml, "leaf"), "<leaf></leaf>");
    }

    #[test]
    fn test_comments_dropped_and_text_escaped() {
        let xml = "<r><!-- hidden -->a &amp; b &gt; c<![CDATA[<x>]]></r>";
        assert_eq!(c14n(xml, "r"), "<r>a &amp; b &gt; c&lt;x&gt;</r>");
    }

    #[test]
    fn test_attribute_value_escaping() {
        let xml = r#"<r v="a&quot;b&#10;c"/>"#;
        assert_eq!(c14n(xml, "r"), r#"<r v="a&quot;b&#xA;c"></r>"#);
    }

    #[test]
    fn test_content_canonicalization() {
        let xml = r#"<soap:Envelope xmlns:soap="urn:soap" xmlns:m="urn:m"><soap:Body> <m:Op>1</m:Op></soap:Body></soap:Envelope>"#;
        let doc = Document::parse(xml).unwrap();
        let body = doc.find_elements(None, "Body").remove(0);
        let content = String::from_utf8(canonicalize_content(&doc, &body).unwrap()).unwrap();
        assert_eq!(content, r#" <m:Op xmlns:m="urn:m">1</m:Op>"#);
    }

    // Exclusive XML Canonicalization 1.0, section 2.2: the same subtree
    // canonicalizes identically in both enclosing documents
    #[test]
    fn test_exclusive_canonicalization_known_answer() {
        let first = r#"<n0:local xmlns:n0="foo:bar" xmlns:n3="ftp://example.org">
  <n1:elem2 xmlns:n1="http://example.net" xml:lang="en">
    <n3:stuff xmlns:n3="ftp://example.org"/>
  </n1:elem2>
</n0:local>"#;
        let second = r#"<n2:pdu xmlns:n1="http://example.com" xmlns:n2="http://foo.example" xml:lang="fr" xml:foo="bar">
  <n1:elem2 xmlns:n1="http://example.net" xml:lang="en">
    <n3:stuff xmlns:n3="ftp://example.org"/>
  </n1:elem2>
</n2:pdu>"#;
        let expected = "<n1:elem2 xmlns:n1=\"http://example.net\" xml:lang=\"en\">\n    <n3:stuff xmlns:n3=\"ftp://example.org\"></n3:stuff>\n  </n1:elem2>";

        assert_eq!(c14n(first, "elem2"), expected);
        assert_eq!(c14n(second, "elem2"), expected);
    }

    // Canonical XML 1.0, section 3.3 input, rendered with exclusive rules
    #[test]
    fn test_start_and_end_tags_known_answer() {
        let xml = r#"<doc>
   <e1   />
   <e2   ></e2>
   <e3   name="elem3"   id="elem3"   />
   <e4   name="elem4"   id="elem4"   ></e4>
   <e5 a:attr="out" b:attr="sorted" attr2="all" attr="I'm"
      xmlns:b="http://www.ietf.org"
      xmlns:a="http://www.w3.org"
      xmlns="http://example.org"/>
   <e6 xmlns="" xmlns:a="http://www.w3.org">
      <e7 xmlns="http://www.ietf.org">
         <e8 xmlns="" xmlns:a="http://www.w3.org">
            <e9 xmlns="" xmlns:a="http://www.ietf.org"/>
         </e8>
      </e7>
   </e6>
</doc>"#;
        let expected = r#"<doc>
   <e1></e1>
   <e2></e2>
   <e3 id="elem3" name="elem3"></e3>
   <e4 id="elem4" name="elem4"></e4>
   <e5 xmlns="http://example.org" xmlns:a="http://www.w3.org" xmlns:b="http://www.ietf.org" attr="I'm" attr2="all" b:attr="sorted" a:attr="out"></e5>
   <e6>
      <e7 xmlns="http://www.ietf.org">
         <e8 xmlns="">
            <e9></e9>
         </e8>
      </e7>
   </e6>
</doc>"#;
        assert_eq!(c14n(xml, "doc"), expected);
    }

    // Canonical XML 1.0, section 3.2: whitespace in character content and
    // attribute values after end-of-line and attribute normalization
    #[test]
    fn test_whitespace_known_answer() {
        let xml = "<doc>\r\n  <t a=\"one\r\ntwo\tthree\" b=\"&#xD;&#xA;&#x9;\">line1\r\nline2\rline3&#xD;</t>\r\n</doc>";
        assert_eq!(
            c14n(xml, "t"),
            "<t a=\"one two three\" b=\"&#xD;&#xA;&#x9;\">line1\nline2\nline3&#xD;</t>"
        );
    }

    #[test]
    fn test_missing_target() {
        let doc = Document::parse("<r/>").unwrap();
        assert!(canonicalize(&doc, &[3]).is_err());
    }
}
