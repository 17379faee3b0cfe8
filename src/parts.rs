//! Selection of the document parts an operation secures.

use crate::document::{Document, Element, ElementPath};
use crate::operation::SecurityOperation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the whole element or only its children are secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartMode {
    Element,
    #[default]
    Content,
}

impl fmt::Display for PartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element => write!(f, "Element"),
            Self::Content => write!(f, "Content"),
        }
    }
}

/// One part to secure, matched by local name and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityPart {
    pub name: String,
    /// Empty or absent matches any namespace
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub mode: PartMode,
}

impl SecurityPart {
    pub fn new(name: impl Into<String>, namespace: Option<&str>, mode: PartMode) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
            mode,
        }
    }

    fn namespace_filter(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn matches(&self, element: &Element) -> bool {
        element.local_name == self.name
            && self
                .namespace_filter()
                .map_or(true, |ns| element.namespace.as_deref() == Some(ns))
    }

    /// Every matching element, in document order.
    pub fn locate(&self, document: &Document) -> Vec<ElementPath> {
        document.find_matching(|e| self.matches(e))
    }
}

impl fmt::Display for SecurityPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace_filter() {
            Some(ns) => write!(f, "{{{}}}{} ({})", ns, self.name, self.mode),
            None => write!(f, "{} ({})", self.name, self.mode),
        }
    }
}

/// The operator's list of parts, kept in step with the active operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPartSelector {
    parts_to_secure: Vec<SecurityPart>,
}

impl SecurityPartSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[SecurityPart] {
        &self.parts_to_secure
    }

    /// Store `parts` and rebuild the operation's own list from them.
    pub fn set_parts<O>(&mut self, parts: Vec<SecurityPart>, operation: &mut O)
    where
        O: SecurityOperation + ?Sized,
    {
        operation.set_parts(&parts);
        self.parts_to_secure = parts;
    }
}
