//! XML canonicalization (C14N 1.0 and Exclusive C14N 1.0, both without comments).
use crate::dom::{Document, DomError, Element, Located, NamespaceScope, Node, XML_NS};
use std::collections::BTreeMap;
use thiserror::Error;

pub const INCLUSIVE_C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const EXCLUSIVE_C14N_URI: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Attribute used to locate the element to canonicalize.
pub const REFERENCE_ATTRIBUTE: &str = "Id";

#[derive(Debug, Error)]
pub enum C14nError {
    #[error("no element carries Id=\"{0}\"")]
    TargetNotFound(String),
    #[error("more than one element carries Id=\"{0}\"")]
    DuplicateId(String),
    #[error("unsupported canonicalization method {0}")]
    UnsupportedMethod(String),
    #[error(transparent)]
    Xml(#[from] DomError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CanonicalizationMethod {
    /// Inclusive C14N 1.0, the method NF-e declares on the wire.
    #[default]
    Inclusive,
    /// Exclusive C14N 1.0 without an inclusive-prefix list.
    Exclusive,
}

impl CanonicalizationMethod {
    pub fn uri(&self) -> &'static str {
        match self {
            CanonicalizationMethod::Inclusive => INCLUSIVE_C14N_URI,
            CanonicalizationMethod::Exclusive => EXCLUSIVE_C14N_URI,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, C14nError> {
        match uri {
            INCLUSIVE_C14N_URI => Ok(CanonicalizationMethod::Inclusive),
            EXCLUSIVE_C14N_URI => Ok(CanonicalizationMethod::Exclusive),
            other => Err(C14nError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Canonicalize `element` as the apex of the output. `scope` is the
/// namespace context inherited from its ancestors.
pub fn canonicalize(
    element: &Element,
    scope: &NamespaceScope,
    method: CanonicalizationMethod,
) -> String {
    let mut out = String::new();
    let mut writer = CanonicalWriter {
        method,
        out: &mut out,
    };
    writer.element(element, scope, &BTreeMap::new(), Some(scope));
    out
}

/// Canonicalize the whole document (root element apex, empty inherited scope).
pub fn canonicalize_document(document: &Document, method: CanonicalizationMethod) -> String {
    canonicalize(document.root(), &NamespaceScope::new(), method)
}

/// Locate the single element whose `Id` equals `id` and canonicalize it.
///
/// # Errors
/// [`C14nError::TargetNotFound`] when no element carries the id and
/// [`C14nError::DuplicateId`] when more than one does.
pub fn canonicalize_by_id(
    document: &Document,
    id: &str,
    method: CanonicalizationMethod,
) -> Result<String, C14nError> {
    let target = locate_by_id(document, id)?;
    Ok(canonicalize(target.element(), target.scope(), method))
}

/// The single element whose `Id` equals `id`.
pub(crate) fn locate_by_id<'d>(document: &'d Document, id: &str) -> Result<Located<'d>, C14nError> {
    let mut found = document.find_by_attribute(REFERENCE_ATTRIBUTE, id);
    if found.len() > 1 {
        return Err(C14nError::DuplicateId(id.to_string()));
    }
    found
        .pop()
        .ok_or_else(|| C14nError::TargetNotFound(id.to_string()))
}

/// Parse `xml` and canonicalize the element identified by `id`.
pub fn canonicalize_xml(
    xml: &str,
    id: &str,
    method: CanonicalizationMethod,
) -> Result<String, C14nError> {
    let document = Document::parse(xml)?;
    canonicalize_by_id(&document, id, method)
}

// prefix ("" for default) -> URI, as rendered by the nearest output ancestor
type Rendered = BTreeMap<String, String>;

struct CanonicalWriter<'o> {
    method: CanonicalizationMethod,
    out: &'o mut String,
}

impl CanonicalWriter<'_> {
    fn element(
        &mut self,
        element: &Element,
        parent_scope: &NamespaceScope,
        rendered: &Rendered,
        apex_scope: Option<&NamespaceScope>,
    ) {
        let scope = parent_scope.enter(element);
        let declarations = match self.method {
            CanonicalizationMethod::Inclusive => inclusive_declarations(&scope, rendered),
            CanonicalizationMethod::Exclusive => exclusive_declarations(element, &scope, rendered),
        };

        let mut attributes: Vec<(&str, &str, String, &str)> = element
            .attributes()
            .iter()
            .map(|attr| {
                let uri = match attr.name().prefix() {
                    Some(prefix) => scope.resolve(Some(prefix)).unwrap_or(""),
                    None => "",
                };
                (uri, attr.name().local_name(), attr.name().to_string(), attr.value())
            })
            .collect();

        // the inclusive apex inherits xml:* attributes from omitted ancestors
        if let (CanonicalizationMethod::Inclusive, Some(inherited)) = (self.method, apex_scope) {
            for (local, value) in inherited.xml_attributes() {
                let present = attributes
                    .iter()
                    .any(|(uri, name, _, _)| *uri == XML_NS && *name == local.as_str());
                if !present {
                    attributes.push((XML_NS, local.as_str(), format!("xml:{local}"), value.as_str()));
                }
            }
        }
        attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let name = element.name().to_string();
        self.out.push('<');
        self.out.push_str(&name);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, self.out);
            self.out.push('"');
        }
        for (_, _, qualified, value) in &attributes {
            self.out.push(' ');
            self.out.push_str(qualified);
            self.out.push_str("=\"");
            escape_attribute(value, self.out);
            self.out.push('"');
        }
        self.out.push('>');

        let mut next_rendered = rendered.clone();
        next_rendered.extend(declarations);

        for child in element.children() {
            match child {
                Node::Element(child) => self.element(child, &scope, &next_rendered, None),
                Node::Text(text) => escape_text(text, self.out),
                Node::ProcessingInstruction { target, data } => {
                    self.out.push_str("<?");
                    self.out.push_str(target);
                    if !data.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(data);
                    }
                    self.out.push_str("?>");
                }
                Node::Comment(_) => {}
            }
        }

        self.out.push_str("</");
        self.out.push_str(&name);
        self.out.push('>');
    }
}

fn inclusive_declarations(scope: &NamespaceScope, rendered: &Rendered) -> Rendered {
    let mut declarations = Rendered::new();
    push_default(scope.default_namespace(), rendered, &mut declarations);
    for (prefix, uri) in scope.prefixed_bindings() {
        if rendered.get(prefix).map(String::as_str) != Some(uri) {
            declarations.insert(prefix.to_string(), uri.to_string());
        }
    }
    declarations
}

fn exclusive_declarations(element: &Element, scope: &NamespaceScope, rendered: &Rendered) -> Rendered {
    let mut declarations = Rendered::new();
    match element.name().prefix() {
        None => push_default(scope.default_namespace(), rendered, &mut declarations),
        Some(prefix) => push_prefixed(prefix, scope, rendered, &mut declarations),
    }
    for attr in element.attributes() {
        if let Some(prefix) = attr.name().prefix() {
            push_prefixed(prefix, scope, rendered, &mut declarations);
        }
    }
    declarations
}

fn push_default(uri: &str, rendered: &Rendered, declarations: &mut Rendered) {
    let current = rendered.get("").map(String::as_str).unwrap_or("");
    if current != uri {
        declarations.insert(String::new(), uri.to_string());
    }
}

fn push_prefixed(prefix: &str, scope: &NamespaceScope, rendered: &Rendered, declarations: &mut Rendered) {
    if prefix == "xml" {
        return;
    }
    // an unbound prefix has nothing to render
    let Some(uri) = scope.resolve(Some(prefix)) else {
        return;
    };
    if rendered.get(prefix).map(String::as_str) != Some(uri) {
        declarations.insert(prefix.to_string(), uri.to_string());
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
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
            c => out.push(c),
        }
    }
}
