//! Namespace-aware XML document model.
//!
//! Payloads are tokenized with quick-xml, which never expands external
//! entities. DOCTYPE declarations are rejected outright, so no entity
//! definitions can reach the tree.
//!
//! Elements are addressed by [`ElementPath`]: the sequence of element-child
//! indexes from the root. Paths ignore text nodes, so re-indenting a document
//! does not invalidate them.

use crate::error::WssError;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Namespace URIs used while securing SOAP messages.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

const INDENT: &str = "  ";

/// In-scope namespace bindings, keyed by prefix (`""` is the default namespace).
pub type NamespaceScope = BTreeMap<String, String>;

/// Element-child indexes from the document root.
pub type ElementPath = Vec<usize>;

/// The bindings every document starts with.
pub fn base_scope() -> NamespaceScope {
    let mut scope = NamespaceScope::new();
    scope.insert("xml".to_string(), XML_NS.to_string());
    scope
}

/// A child node of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// A non-namespace attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(qualified_name: &str, value: impl Into<String>) -> Self {
        let (prefix, local_name) = split_qname(qualified_name);
        Self {
            prefix: prefix.map(str::to_string),
            local_name: local_name.to_string(),
            value: value.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.local_name)
    }
}

/// An element with its own namespace declarations and resolved namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    /// `xmlns` / `xmlns:p` declarations made on this element, in source order.
    pub namespace_decls: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(prefix: Option<&str>, local_name: &str, namespace: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            local_name: local_name.to_string(),
            namespace: namespace.map(str::to_string),
            namespace_decls: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_namespace_decl(mut self, prefix: &str, uri: &str) -> Self {
        self.declare_namespace(prefix, uri);
        self
    }

    pub fn with_attribute(mut self, qualified_name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(qualified_name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn qualified_name(&self) -> String {
        qualify(self.prefix.as_deref(), &self.local_name)
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Declare (or rebind) a prefix on this element.
    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        match self.namespace_decls.iter_mut().find(|(p, _)| p == prefix) {
            Some(decl) => decl.1 = uri.to_string(),
            None => self
                .namespace_decls
                .push((prefix.to_string(), uri.to_string())),
        }
    }

    pub fn set_attribute(&mut self, qualified_name: &str, value: impl Into<String>) {
        let attribute = Attribute::new(qualified_name, value);
        match self
            .attributes
            .iter_mut()
            .find(|a| a.prefix == attribute.prefix && a.local_name == attribute.local_name)
        {
            Some(existing) => existing.value = attribute.value,
            None => self.attributes.push(attribute),
        }
    }

    pub fn attribute(&self, qualified_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.qualified_name() == qualified_name)
            .map(|a| a.value.as_str())
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    /// Concatenated character data of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) | Node::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_element(&self, index: usize) -> Option<&Element> {
        self.child_elements().nth(index)
    }

    pub fn child_element_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter_map(|c| match c {
                Node::Element(e) => Some(e),
                _ => None,
            })
            .nth(index)
    }

    pub fn first_child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(namespace, local_name))
    }

    /// Insert before the `index`-th element child, or append when there is none.
    pub fn insert_child_element(&mut self, index: usize, child: Element) {
        match self.node_index(index) {
            Some(position) => self.children.insert(position, Node::Element(child)),
            None => self.children.push(Node::Element(child)),
        }
    }

    /// Swap the `index`-th element child for `child`, returning the old one.
    pub fn replace_child_element(&mut self, index: usize, child: Element) -> Option<Element> {
        let position = self.node_index(index)?;
        match std::mem::replace(&mut self.children[position], Node::Element(child)) {
            Node::Element(old) => Some(old),
            _ => None,
        }
    }

    fn node_index(&self, element_index: usize) -> Option<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Node::Element(_)))
            .nth(element_index)
            .map(|(i, _)| i)
    }

    fn is_element_only(&self) -> bool {
        self.children.iter().any(|c| matches!(c, Node::Element(_)))
            && self.children.iter().all(|c| match c {
                Node::Text(t) => is_xml_whitespace(t),
                Node::CData(_) => false,
                _ => true,
            })
    }
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    has_declaration: bool,
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self {
            has_declaration: true,
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Parse a payload into a namespace-resolved tree.
    pub fn parse(xml: &str) -> Result<Self, WssError> {
        let source = normalize_line_endings(xml);
        let mut reader = Reader::from_str(&source);

        let mut has_declaration = false;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        // Open elements with the scope in force inside each of them.
        let mut stack: Vec<(Element, NamespaceScope)> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                WssError::XmlParse(format!("{} at position {}", e, reader.buffer_position()))
            })?;

            match event {
                Event::Start(e) => {
                    let parent_scope = stack.last().map(|(_, s)| s.clone()).unwrap_or_else(base_scope);
                    if stack.is_empty() && root.is_some() {
                        return Err(WssError::XmlParse("multiple root elements".to_string()));
                    }
                    stack.push(open_element(&e, &parent_scope)?);
                }
                Event::Empty(e) => {
                    let parent_scope = stack.last().map(|(_, s)| s.clone()).unwrap_or_else(base_scope);
                    let (element, _) = open_element(&e, &parent_scope)?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let (element, _) = stack.pop().ok_or_else(|| {
                        WssError::XmlParse("unexpected closing tag".to_string())
                    })?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| WssError::XmlParse(e.to_string()))?
                        .into_owned();
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(Node::Text(text)),
                        None if is_xml_whitespace(&text) => {}
                        None => {
                            return Err(WssError::XmlParse(
                                "character data outside the root element".to_string(),
                            ))
                        }
                    }
                }
                Event::CData(e) => {
                    let text = utf8(&e)?.to_string();
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(Node::CData(text)),
                        None => {
                            return Err(WssError::XmlParse(
                                "CDATA section outside the root element".to_string(),
                            ))
                        }
                    }
                }
                Event::Comment(e) => {
                    let node = Node::Comment(utf8(&e)?.to_string());
                    push_misc(node, &mut stack, &root, &mut prolog, &mut epilog);
                }
                Event::PI(e) => {
                    let node = Node::ProcessingInstruction(utf8(&e)?.to_string());
                    push_misc(node, &mut stack, &root, &mut prolog, &mut epilog);
                }
                Event::Decl(_) => has_declaration = true,
                Event::DocType(_) => {
                    return Err(WssError::XmlParse(
                        "DOCTYPE declarations are not allowed".to_string(),
                    ))
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(WssError::XmlParse("unexpected end of document".to_string()));
        }
        let root = root.ok_or_else(|| WssError::XmlParse("document has no root element".to_string()))?;

        Ok(Self {
            has_declaration,
            prolog,
            root,
            epilog,
        })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn element(&self, path: &[usize]) -> Option<&Element> {
        let mut current = &self.root;
        for &index in path {
            current = current.child_element(index)?;
        }
        Some(current)
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = &mut self.root;
        for &index in path {
            current = current.child_element_mut(index)?;
        }
        Some(current)
    }

    /// Namespace bindings in force inside the element at `path`, including
    /// its own declarations.
    pub fn scope_at(&self, path: &[usize]) -> Option<NamespaceScope> {
        let mut scope = base_scope();
        let mut current = &self.root;
        apply_decls(&mut scope, current);
        for &index in path {
            current = current.child_element(index)?;
            apply_decls(&mut scope, current);
        }
        Some(scope)
    }

    /// Paths of every element (root included) satisfying `predicate`, in
    /// document order.
    pub fn find_matching<F>(&self, predicate: F) -> Vec<ElementPath>
    where
        F: Fn(&Element) -> bool,
    {
        let mut found = Vec::new();
        collect_matching(&self.root, &mut Vec::new(), &predicate, &mut found);
        found
    }

    /// Elements by local name; `None` namespace matches any namespace.
    pub fn find_elements(&self, namespace: Option<&str>, local_name: &str) -> Vec<ElementPath> {
        self.find_matching(|e| {
            e.local_name == local_name
                && namespace.map_or(true, |ns| e.namespace.as_deref() == Some(ns))
        })
    }

    /// Locate the element carrying an `Id` attribute (any prefix) with this value.
    pub fn find_by_id(&self, id: &str) -> Option<ElementPath> {
        self.find_matching(|e| {
            e.attributes
                .iter()
                .any(|a| a.local_name == "Id" && a.value == id)
        })
        .into_iter()
        .next()
    }

    /// Re-indent element-only content. Mixed content and text-only elements
    /// are left alone, and indenting twice gives the same tree as once.
    pub fn indent(&mut self) {
        indent_element(&mut self.root, 0);
    }

    pub fn to_xml_string(&self) -> Result<String, WssError> {
        let mut out = String::new();
        if self.has_declaration {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        }
        for node in &self.prolog {
            write_misc(node, &mut out);
            out.push('\n');
        }
        write_element(&self.root, &base_scope(), &mut out)?;
        for node in &self.epilog {
            out.push('\n');
            write_misc(node, &mut out);
        }
        Ok(out)
    }

    /// Indent and serialize.
    pub fn into_pretty_string(mut self) -> Result<String, WssError> {
        self.indent();
        self.to_xml_string()
    }
}

pub(crate) fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

fn qualify(prefix: Option<&str>, local_name: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local_name),
        None => local_name.to_string(),
    }
}

/// XML end-of-line handling: `\r\n` and a lone `\r` both read as `\n`.
fn normalize_line_endings(xml: &str) -> Cow<'_, str> {
    if !xml.contains('\r') {
        return Cow::Borrowed(xml);
    }
    let mut out = String::with_capacity(xml.len());
    let mut chars = xml.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn is_xml_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

fn utf8(bytes: &[u8]) -> Result<&str, WssError> {
    std::str::from_utf8(bytes).map_err(|e| WssError::XmlParse(format!("Invalid UTF-8: {}", e)))
}

fn apply_decls(scope: &mut NamespaceScope, element: &Element) {
    for (prefix, uri) in &element.namespace_decls {
        scope.insert(prefix.clone(), uri.clone());
    }
}

/// Resolve a prefix; an empty binding (`xmlns=""`) means no namespace.
fn resolve_prefix(scope: &NamespaceScope, prefix: Option<&str>) -> Option<String> {
    scope
        .get(prefix.unwrap_or(""))
        .filter(|uri| !uri.is_empty())
        .cloned()
}

fn open_element(
    start: &BytesStart<'_>,
    parent_scope: &NamespaceScope,
) -> Result<(Element, NamespaceScope), WssError> {
    let qname = utf8(start.name().as_ref())?.to_string();
    let (prefix, local_name) = split_qname(&qname);

    let mut scope = parent_scope.clone();
    let mut namespace_decls = Vec::new();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| WssError::XmlParse(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        // Literal whitespace in attribute values reads as a space;
        // character references keep their value
        let raw = utf8(&attr.value)?.replace(['\t', '\n', '\r'], " ");
        let value = unescape(&raw)
            .map_err(|e| WssError::XmlParse(e.to_string()))?
            .into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
            namespace_decls.push((String::new(), value));
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            scope.insert(p.to_string(), value.clone());
            namespace_decls.push((p.to_string(), value));
        } else {
            attributes.push(Attribute::new(&key, value));
        }
    }

    let namespace = resolve_prefix(&scope, prefix);
    if let Some(p) = prefix {
        if namespace.is_none() {
            return Err(WssError::XmlParse(format!(
                "unbound namespace prefix '{}' on element '{}'",
                p, qname
            )));
        }
    }
    for attribute in &attributes {
        if let Some(p) = attribute.prefix.as_deref() {
            if resolve_prefix(&scope, Some(p)).is_none() {
                return Err(WssError::XmlParse(format!(
                    "unbound namespace prefix '{}' on attribute '{}'",
                    p,
                    attribute.qualified_name()
                )));
            }
        }
    }

    let element = Element {
        prefix: prefix.map(str::to_string),
        local_name: local_name.to_string(),
        namespace,
        namespace_decls,
        attributes,
        children: Vec::new(),
    };
    Ok((element, scope))
}

fn close_element(
    element: Element,
    stack: &mut [(Element, NamespaceScope)],
    root: &mut Option<Element>,
) -> Result<(), WssError> {
    match stack.last_mut() {
        Some((parent, _)) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(WssError::XmlParse("multiple root elements".to_string())),
    }
    Ok(())
}

fn push_misc(
    node: Node,
    stack: &mut [(Element, NamespaceScope)],
    root: &Option<Element>,
    prolog: &mut Vec<Node>,
    epilog: &mut Vec<Node>,
) {
    match stack.last_mut() {
        Some((parent, _)) => parent.children.push(node),
        None if root.is_none() => prolog.push(node),
        None => epilog.push(node),
    }
}

fn collect_matching<F>(
    element: &Element,
    path: &mut Vec<usize>,
    predicate: &F,
    found: &mut Vec<ElementPath>,
) where
    F: Fn(&Element) -> bool,
{
    if predicate(element) {
        found.push(path.clone());
    }
    for (index, child) in element.child_elements().enumerate() {
        path.push(index);
        collect_matching(child, path, predicate, found);
        path.pop();
    }
}

fn indent_element(element: &mut Element, depth: usize) {
    for child in element.children.iter_mut() {
        if let Node::Element(e) = child {
            indent_element(e, depth + 1);
        }
    }

    if !element.is_element_only() {
        return;
    }

    let inner = format!("\n{}", INDENT.repeat(depth + 1));
    let children = std::mem::take(&mut element.children);
    for child in children {
        if matches!(child, Node::Text(_)) {
            continue;
        }
        element.children.push(Node::Text(inner.clone()));
        element.children.push(child);
    }
    element
        .children
        .push(Node::Text(format!("\n{}", INDENT.repeat(depth))));
}

fn write_element(element: &Element, parent_scope: &NamespaceScope, out: &mut String) -> Result<(), WssError> {
    let mut scope = parent_scope.clone();
    apply_decls(&mut scope, element);

    if let Some(p) = element.prefix.as_deref() {
        if resolve_prefix(&scope, Some(p)).is_none() {
            return Err(WssError::Serialize(format!(
                "unbound namespace prefix '{}' on element '{}'",
                p,
                element.qualified_name()
            )));
        }
    }

    let name = element.qualified_name();
    out.push('<');
    out.push_str(&name);
    for (prefix, uri) in &element.namespace_decls {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }
    for attribute in &element.attributes {
        if let Some(p) = attribute.prefix.as_deref() {
            if resolve_prefix(&scope, Some(p)).is_none() {
                return Err(WssError::Serialize(format!(
                    "unbound namespace prefix '{}' on attribute '{}'",
                    p,
                    attribute.qualified_name()
                )));
            }
        }
        out.push(' ');
        out.push_str(&attribute.qualified_name());
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attribute.value));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
        return Ok(());
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(e, &scope, out)?,
            Node::Text(t) => out.push_str(&escape_text(t)),
            other => write_misc(other, out),
        }
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
    Ok(())
}

fn write_misc(node: &Node, out: &mut String) {
    match node {
        Node::CData(t) => {
            out.push_str("<![CDATA[");
            out.push_str(t);
            out.push_str("]]>");
        }
        Node::Comment(t) => {
            out.push_str("<!--");
            out.push_str(t);
            out.push_str("-->");
        }
        Node::ProcessingInstruction(t) => {
            out.push_str("<?");
            out.push_str(t);
            out.push_str("?>");
        }
        Node::Text(t) => out.push_str(&escape_text(t)),
        Node::Element(_) => {}
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
<soap:Body><m:GetPrice xmlns:m="urn:example:stock" m:unit="usd"><m:Item>Apple &amp; Pear</m:Item></m:GetPrice></soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = Document::parse(SOAP).unwrap();
        assert!(doc.root().is(SOAP_11_NS, "Envelope"));

        let paths = doc.find_elements(Some("urn:example:stock"), "Item");
        assert_eq!(paths, vec![vec![0, 0, 0]]);
        let item = doc.element(&paths[0]).unwrap();
        assert_eq!(item.text(), "Apple & Pear");
        assert_eq!(item.prefix.as_deref(), Some("m"));
    }

    #[test]
    fn test_find_elements_any_namespace() {
        let doc = Document::parse(SOAP).unwrap();
        assert_eq!(doc.find_elements(None, "Body"), vec![vec![0]]);
        assert!(doc.find_elements(Some("urn:other"), "Body").is_empty());
    }

    #[test]
    fn test_parse_rejects_doctype() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<foo>&xxe;</foo>"#;
        let err = Document::parse(xml).unwrap_err();
        assert!(matches!(err, WssError::XmlParse(_)));
        assert!(err.to_string().contains("DOCTYPE"));
    }

    #[test]
    fn test_parse_rejects_unbound_prefix() {
        let err = Document::parse("<a:root/>").unwrap_err();
        assert!(err.to_string().contains("unbound namespace prefix 'a'"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Document::parse("<not valid xml").is_err());
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a></b>").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
        assert!(Document::parse("<a/>trailing").is_err());
    }

    #[test]
    fn test_serialize_preserves_content() {
        let doc = Document::parse(SOAP).unwrap();
        let out = doc.to_xml_string().unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(out.contains("<m:Item>Apple &amp; Pear</m:Item>"));
        assert!(out.contains(r#"<m:GetPrice xmlns:m="urn:example:stock" m:unit="usd">"#));

        let reparsed = Document::parse(&out).unwrap();
        assert_eq!(reparsed.root(), doc.root());
    }

    #[test]
    fn test_serialize_rejects_unbound_prefix() {
        let root = Element::new(Some("soap"), "Envelope", Some(SOAP_11_NS))
            .with_child(Element::new(Some("wsse"), "Security", Some(WSSE_NS)));
        let doc = Document::new(root);
        let err = doc.to_xml_string().unwrap_err();
        assert!(matches!(err, WssError::Serialize(_)));
    }

    #[test]
    fn test_indent_is_idempotent() {
        let mut doc = Document::parse(SOAP).unwrap();
        doc.indent();
        let once = doc.to_xml_string().unwrap();
        doc.indent();
        let twice = doc.to_xml_string().unwrap();
        assert_eq!(once, twice);
        assert!(once.contains("\n  <soap:Body>\n    <m:GetPrice"));
        // Text-only content is untouched
        assert!(once.contains("<m:Item>Apple &amp; Pear</m:Item>"));
    }

    #[test]
    fn test_indent_leaves_mixed_content() {
        let mut doc = Document::parse("<p>Hello <b>world</b>!</p>").unwrap();
        doc.indent();
        let out = doc.to_xml_string().unwrap();
        assert!(out.ends_with("<p>Hello <b>world</b>!</p>"));
    }

    #[test]
    fn test_paths_survive_indent() {
        let mut doc = Document::parse(SOAP).unwrap();
        let before = doc.find_elements(None, "Item");
        doc.indent();
        assert_eq!(doc.find_elements(None, "Item"), before);
    }

    #[test]
    fn test_find_by_id_any_prefix() {
        let xml = r#"<r xmlns:wsu="urn:u"><a wsu:Id="one"/><b Id="two"/></r>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(doc.find_by_id("one"), Some(vec![0]));
        assert_eq!(doc.find_by_id("two"), Some(vec![1]));
        assert_eq!(doc.find_by_id("three"), None);
    }

    #[test]
    fn test_scope_at_includes_ancestors() {
        let doc = Document::parse(SOAP).unwrap();
        let scope = doc.scope_at(&[0, 0]).unwrap();
        assert_eq!(scope.get("soap").map(String::as_str), Some(SOAP_11_NS));
        assert_eq!(scope.get("m").map(String::as_str), Some("urn:example:stock"));
        assert_eq!(scope.get("xml").map(String::as_str), Some(XML_NS));
        assert!(doc.scope_at(&[5]).is_none());
    }

    #[test]
    fn test_insert_and_replace_child_element() {
        let mut doc = Document::parse("<r> <a/> <c/> </r>").unwrap();
        doc.root_mut()
            .insert_child_element(1, Element::new(None, "b", None));
        let names: Vec<_> = doc.root().child_elements().map(|e| e.local_name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let old = doc
            .root_mut()
            .replace_child_element(2, Element::new(None, "d", None))
            .unwrap();
        assert_eq!(old.local_name, "c");
        assert_eq!(doc.root().child_element(2).unwrap().local_name, "d");
    }

    #[test]
    fn test_comments_and_cdata_kept() {
        let xml = "<!-- lead --><r><![CDATA[a < b]]><!-- inner --></r>";
        let doc = Document::parse(xml).unwrap();
        let out = doc.to_xml_string().unwrap();
        assert_eq!(out, "<!-- lead -->\n<r><![CDATA[a < b]]><!-- inner --></r>");
    }

    #[test]
    fn test_line_endings_normalized() {
        let doc = Document::parse("<r>\r\n<a>one\r\ntwo\rthree</a>\r\n</r>").unwrap();
        assert_eq!(doc.element(&[0]).unwrap().text(), "one\ntwo\nthree");
        assert!(!doc.to_xml_string().unwrap().contains('\r'));
    }

    #[test]
    fn test_carriage_return_reference_survives_round_trip() {
        let doc = Document::parse("<r>a&#13;b</r>").unwrap();
        assert_eq!(doc.root().text(), "a\rb");

        let out = doc.to_xml_string().unwrap();
        assert_eq!(out, "<r>a&#13;b</r>");
        assert_eq!(Document::parse(&out).unwrap().root().text(), "a\rb");
    }

    #[test]
    fn test_attribute_whitespace_normalized() {
        let doc = Document::parse("<r a=\"x\ty\r\nz\" b=\"1&#10;2&#9;3\"/>").unwrap();
        assert_eq!(doc.root().attribute("a"), Some("x y z"));
        assert_eq!(doc.root().attribute("b"), Some("1\n2\t3"));

        let out = doc.to_xml_string().unwrap();
        let again = Document::parse(&out).unwrap();
        assert_eq!(again.root().attribute("b"), Some("1\n2\t3"));
    }
}
