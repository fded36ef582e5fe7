//! Generic XML element tree.
//!
//! The typed invoice model serializes itself through serde; everything that
//! has to stay structure-agnostic (canonicalization, signature assembly and
//! verification, SEFAZ response parsing) works on this tree instead.
//!
//! Comments and processing instructions inside the root element are kept as
//! [`Node::Comment`] and [`Node::ProcessingInstruction`]; those outside it are
//! dropped. Canonicalization omits the comments. A DTD is rejected.
use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Errors raised while reading XML into a [`Document`].
#[derive(Debug, Error)]
pub enum DomError {
    #[error("XML parse error: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("invalid attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("invalid character or entity reference: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("XML is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("document type declarations are not supported")]
    DocType,
    #[error("document has no root element")]
    MissingRoot,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("unexpected closing tag </{0}>")]
    UnexpectedEnd(String),
    #[error("unclosed element <{0}>")]
    Unclosed(String),
}

/// Qualified name as written in the document (`prefix:local` or `local`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    prefix: Option<String>,
    local: String,
}

impl QName {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
        }
    }

    pub fn prefixed(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((prefix, local)) => Self::prefixed(prefix, local),
            None => Self::new(raw),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

impl From<&str> for QName {
    fn from(raw: &str) -> Self {
        QName::parse(raw)
    }
}

/// Attribute other than a namespace declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: QName,
    value: String,
}

impl Attribute {
    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// `xmlns` or `xmlns:prefix` declaration carried by an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    prefix: Option<String>,
    uri: String,
}

impl NamespaceDecl {
    /// `None` is the default namespace.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: QName,
    namespaces: Vec<NamespaceDecl>,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<QName>) -> Self {
        Self {
            name: name.into(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        self.namespaces.push(NamespaceDecl {
            prefix: prefix.map(str::to_string),
            uri: uri.into(),
        });
        self
    }

    pub fn with_attribute(mut self, name: impl Into<QName>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_child(Node::Text(text.into()));
        self
    }

    /// Append a child node; adjacent text nodes are merged.
    pub fn push_child(&mut self, node: Node) {
        if let Node::Text(text) = &node {
            if text.is_empty() {
                return;
            }
            if let Some(Node::Text(previous)) = self.children.last_mut() {
                previous.push_str(text);
                return;
            }
        }
        self.children.push(node);
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        self.name.local_name()
    }

    pub fn namespaces(&self) -> &[NamespaceDecl] {
        &self.namespaces
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Attribute value by its qualified name as written (`Id`, `xml:lang`).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.to_string() == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// First child element with the given local name, any namespace.
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.child_elements()
            .find(|element| element.local_name() == local_name)
    }

    /// First descendant (depth first, document order) with the given local name.
    pub fn descendant(&self, local_name: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.local_name() == local_name {
                return Some(child);
            }
            if let Some(found) = child.descendant(local_name) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Trimmed text of the first child with the given local name.
    pub fn child_text(&self, local_name: &str) -> Option<String> {
        self.child(local_name)
            .map(|child| child.text().trim().to_string())
    }

    /// Serialize without an XML declaration.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(element, out),
            _ => {}
        }
    }
}

/// Namespace bindings (and inheritable `xml:*` attributes) in effect at a
/// point of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceScope {
    // "" is the default namespace; an empty URI undeclares it
    bindings: BTreeMap<String, String>,
    xml_attributes: BTreeMap<String, String>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope in effect inside `element`.
    pub fn enter(&self, element: &Element) -> NamespaceScope {
        let mut next = self.clone();
        for decl in &element.namespaces {
            next.bindings
                .insert(decl.prefix.clone().unwrap_or_default(), decl.uri.clone());
        }
        for attr in &element.attributes {
            if attr.name.prefix() == Some("xml") {
                next.xml_attributes
                    .insert(attr.name.local.clone(), attr.value.clone());
            }
        }
        next
    }

    /// Namespace URI bound to `prefix` (`None` for the default namespace).
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            Some("xml") => Some(XML_NS),
            Some(prefix) => self.bindings.get(prefix).map(String::as_str),
            None => self
                .bindings
                .get("")
                .map(String::as_str)
                .filter(|uri| !uri.is_empty()),
        }
    }

    /// Default namespace URI, empty when none is in effect.
    pub(crate) fn default_namespace(&self) -> &str {
        self.bindings.get("").map(String::as_str).unwrap_or("")
    }

    /// Prefixed bindings, sorted by prefix.
    pub(crate) fn prefixed_bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings
            .iter()
            .filter(|(prefix, uri)| !prefix.is_empty() && !uri.is_empty())
            .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
    }

    pub(crate) fn xml_attributes(&self) -> &BTreeMap<String, String> {
        &self.xml_attributes
    }
}

/// An element found in a document together with the scope of its parent.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    element: &'a Element,
    scope: NamespaceScope,
}

impl<'a> Located<'a> {
    pub fn element(&self) -> &'a Element {
        self.element
    }

    /// Bindings inherited from the ancestors of the element.
    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }
}

/// A parsed XML document.
///
/// # Examples
/// ```rust
/// use nfe_core::dom::Document;
///
/// let doc = Document::parse(r#"<NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="NFe1"/></NFe>"#)?;
/// let found = doc.find_by_attribute("Id", "NFe1");
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].element().local_name(), "infNFe");
/// # Ok::<(), nfe_core::dom::DomError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parse a document. Line endings are normalized, entity and character
    /// references resolved, and CDATA sections turned into text.
    ///
    /// # Errors
    /// Returns [`DomError`] for malformed XML and for documents carrying a DTD.
    pub fn parse(xml: &str) -> Result<Self, DomError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        DomError::UnexpectedEnd(
                            String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                        )
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = std::str::from_utf8(&text)?;
                        let value = unescape(&normalize_newlines(raw))?.into_owned();
                        parent.push_child(Node::Text(value));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = std::str::from_utf8(&data)?;
                        parent.push_child(Node::Text(normalize_newlines(raw).into_owned()));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = std::str::from_utf8(&comment)?;
                        parent.push_child(Node::Comment(normalize_newlines(raw).into_owned()));
                    }
                }
                Event::PI(pi) => {
                    if let Some(parent) = stack.last_mut() {
                        let target = std::str::from_utf8(pi.target())?.to_string();
                        let data = std::str::from_utf8(pi.content())?.trim_start().to_string();
                        parent.push_child(Node::ProcessingInstruction { target, data });
                    }
                }
                Event::DocType(_) => return Err(DomError::DocType),
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(DomError::Unclosed(open.name.to_string()));
        }
        root.map(Document::new).ok_or(DomError::MissingRoot)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// All elements whose attribute `attribute` equals `value`, in document order.
    pub fn find_by_attribute(&self, attribute: &str, value: &str) -> Vec<Located<'_>> {
        let mut found = Vec::new();
        collect_by_attribute(&self.root, &NamespaceScope::new(), attribute, value, &mut found);
        found
    }

    /// Serialize with an XML declaration and no added whitespace.
    pub fn to_xml(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        write_element(&self.root, &mut out);
        out
    }
}

impl FromStr for Document {
    type Err = DomError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Document::parse(s)
    }
}

fn collect_by_attribute<'a>(
    element: &'a Element,
    parent_scope: &NamespaceScope,
    attribute: &str,
    value: &str,
    found: &mut Vec<Located<'a>>,
) {
    if element.attribute(attribute) == Some(value) {
        found.push(Located {
            element,
            scope: parent_scope.clone(),
        });
    }
    let scope = parent_scope.enter(element);
    for child in element.child_elements() {
        collect_by_attribute(child, &scope, attribute, value, found);
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DomError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_child(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DomError::MultipleRoots),
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, DomError> {
    let qname = start.name();
    let name = std::str::from_utf8(qname.as_ref())?;
    let mut element = Element::new(QName::parse(name));
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())?;
        let raw = std::str::from_utf8(&attribute.value)?;
        let value = unescape(&normalize_attribute(raw))?.into_owned();

        if key == "xmlns" {
            element.namespaces.push(NamespaceDecl {
                prefix: None,
                uri: value,
            });
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            element.namespaces.push(NamespaceDecl {
                prefix: Some(prefix.to_string()),
                uri: value,
            });
        } else {
            element.attributes.push(Attribute {
                name: QName::parse(key),
                value,
            });
        }
    }
    Ok(element)
}

fn normalize_newlines(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

// literal whitespace in attribute values becomes a space; references survive
fn normalize_attribute(raw: &str) -> String {
    normalize_newlines(raw).replace(['\n', '\t'], " ")
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name.to_string());
    for decl in &element.namespaces {
        match &decl.prefix {
            Some(prefix) => {
                out.push_str(" xmlns:");
                out.push_str(prefix);
            }
            None => out.push_str(" xmlns"),
        }
        out.push_str("=\"");
        out.push_str(&escape_attribute(&decl.uri));
        out.push('"');
    }
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.name.to_string());
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attr.value));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(child) => write_element(child, out),
            Node::Text(text) => out.push_str(&escape(text.as_str()).replace('\r', "&#13;")),
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::ProcessingInstruction { target, data } => {
                out.push_str("<?");
                out.push_str(target);
                if !data.is_empty() {
                    out.push(' ');
                    out.push_str(data);
                }
                out.push_str("?>");
            }
        }
    }
    out.push_str("</");
    out.push_str(&element.name.to_string());
    out.push('>');
}

fn escape_attribute(value: &str) -> String {
    escape(value)
        .replace('\t', "&#9;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
}
