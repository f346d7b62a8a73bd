//! Qualified names and the namespace binding stack.

use crate::errors::Result;

/// The predefined namespace name of the `xml` prefix.
pub const NS_XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
/// The namespace name reserved for `xmlns` itself; it can never be declared.
pub const NS_XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

/// Splits a qualified name into its optional prefix and local part.
///
/// `a:b` → `(Some("a"), "b")`, `b` → `(None, "b")`. Degenerate forms such
/// as `:b`, `a:` or `a:b:c` are the caller's problem; this only splits at
/// the first colon.
#[inline]
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.find(':') {
        Some(i) => (Some(&qname[..i]), &qname[i + 1..]),
        None => (None, qname),
    }
}

/// Why a namespace declaration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    /// `xml` must map to its predefined URI and nothing else may map to it.
    ReservedXml,
    /// `xmlns` may never be declared, and nothing may map to its URI.
    ReservedXmlns,
    /// A non-default prefix was bound to the empty string; unbinding
    /// prefixes is an XML 1.1 feature.
    EmptyPrefixBinding(String),
    /// The prefix of an element or attribute name has no binding in scope.
    UnboundPrefix(String),
}

impl std::fmt::Display for NamespaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NamespaceError::ReservedXml => {
                f.write_str("the xml prefix is predefined and cannot be redeclared")
            }
            NamespaceError::ReservedXmlns => f.write_str("the xmlns prefix cannot be declared"),
            NamespaceError::EmptyPrefixBinding(p) => {
                write!(f, "prefix \"{}\" cannot be bound to an empty namespace name", p)
            }
            NamespaceError::UnboundPrefix(p) => write!(f, "prefix \"{}\" is not declared", p),
        }
    }
}

/// Result of resolving a qualified name against the current bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveResult<'a> {
    /// The name is bound to this namespace name.
    Bound(&'a str),
    /// The name has no namespace (no prefix and no default binding, or an
    /// attribute without a prefix).
    Unbound,
    /// The prefix has no binding in scope.
    Unknown,
}

/// The prefix → namespace-name binding stack.
///
/// A frame is pushed for every element start and popped at the matching
/// end. Lookup walks the bindings newest-first, so inner redeclarations
/// shadow outer ones. The `xml` prefix is served without being stored.
#[derive(Debug, Default, Clone)]
pub struct NamespaceSupport {
    /// All live bindings, oldest first. The default namespace is stored
    /// under the empty prefix; an empty URI entry re-unbinds it.
    bindings: Vec<(String, String)>,
    /// Number of bindings live at each open scope.
    scopes: Vec<usize>,
}

impl NamespaceSupport {
    pub fn new() -> Self {
        NamespaceSupport::default()
    }

    /// Opens a scope for one element.
    pub fn push_context(&mut self) {
        self.scopes.push(self.bindings.len());
    }

    /// Closes the innermost scope, returning the bindings it declared so
    /// the parser can emit `end_prefix_mapping` events.
    pub fn pop_context(&mut self) -> Vec<(String, String)> {
        let mark = self.scopes.pop().unwrap_or(0);
        self.bindings.split_off(mark)
    }

    /// Declares a binding in the innermost scope. `prefix` is `""` for the
    /// default namespace; `uri` of `""` unbinds the default namespace.
    pub fn declare(&mut self, prefix: &str, uri: &str) -> std::result::Result<(), NamespaceError> {
        match prefix {
            "xml" => {
                if uri != NS_XML_URI {
                    return Err(NamespaceError::ReservedXml);
                }
                // Redundant but legal; nothing to store.
                return Ok(());
            }
            "xmlns" => return Err(NamespaceError::ReservedXmlns),
            _ => {}
        }
        if uri == NS_XML_URI {
            return Err(NamespaceError::ReservedXml);
        }
        if uri == NS_XMLNS_URI {
            return Err(NamespaceError::ReservedXmlns);
        }
        if uri.is_empty() && !prefix.is_empty() {
            return Err(NamespaceError::EmptyPrefixBinding(prefix.to_string()));
        }
        self.bindings.push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    /// Looks up a prefix. The empty prefix answers the default namespace.
    pub fn find(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(NS_XML_URI);
        }
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Resolves an element name: an unprefixed name picks up the default
    /// namespace.
    pub fn resolve_element<'a>(&'a self, qname: &str) -> ResolveResult<'a> {
        let (prefix, _) = split_qname(qname);
        match prefix {
            Some(p) => match self.find(p) {
                Some(uri) => ResolveResult::Bound(uri),
                None => ResolveResult::Unknown,
            },
            None => match self.find("") {
                Some(uri) if !uri.is_empty() => ResolveResult::Bound(uri),
                _ => ResolveResult::Unbound,
            },
        }
    }

    /// Resolves an attribute name: an unprefixed attribute never inherits
    /// the default namespace.
    pub fn resolve_attribute<'a>(&'a self, qname: &str) -> ResolveResult<'a> {
        let (prefix, _) = split_qname(qname);
        match prefix {
            Some(p) => match self.find(p) {
                Some(uri) => ResolveResult::Bound(uri),
                None => ResolveResult::Unknown,
            },
            None => ResolveResult::Unbound,
        }
    }

    /// Nesting depth in open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Splits an `xmlns` attribute into the declared prefix and URI, or `None`
/// when the attribute is not a namespace declaration at all.
pub(crate) fn as_namespace_decl<'a>(qname: &'a str, value: &'a str) -> Option<(&'a str, &'a str)> {
    if qname == "xmlns" {
        Some(("", value))
    } else if let Some(prefix) = qname.strip_prefix("xmlns:") {
        Some((prefix, value))
    } else {
        None
    }
}

/// Convenience used by the parser: true when the qname is a namespace
/// declaration attribute.
pub(crate) fn is_namespace_decl(qname: &str) -> bool {
    qname == "xmlns" || qname.starts_with("xmlns:")
}

/// Sanity checks on a qualified name beyond the character classes: at most
/// one colon, non-empty prefix and local part.
pub(crate) fn check_qname_shape(qname: &str) -> Result<()> {
    let colons = qname.matches(':').count();
    let ok = match colons {
        0 => true,
        1 => {
            let (prefix, local) = split_qname(qname);
            prefix.map_or(false, |p| !p.is_empty()) && !local.is_empty()
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(crate::errors::Error::Parse(Box::new(
            crate::errors::ParseError::new(
                crate::errors::Severity::Fatal,
                format!("\"{}\" is not a valid qualified name", qname),
                crate::errors::Location::unknown(),
            ),
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn qname_splitting() {
        assert_eq!(split_qname("a:b"), (Some("a"), "b"));
        assert_eq!(split_qname("b"), (None, "b"));
        assert_eq!(split_qname("x:y:z"), (Some("x"), "y:z"));
    }

    #[test]
    fn shadowing_and_scoping() {
        let mut ns = NamespaceSupport::new();
        ns.push_context();
        ns.declare("p", "uri:outer").unwrap();
        ns.push_context();
        ns.declare("p", "uri:inner").unwrap();
        assert_eq!(ns.find("p"), Some("uri:inner"));
        let undeclared = ns.pop_context();
        assert_eq!(undeclared, vec![("p".to_string(), "uri:inner".to_string())]);
        assert_eq!(ns.find("p"), Some("uri:outer"));
    }

    #[test]
    fn default_namespace_binding_and_unbinding() {
        let mut ns = NamespaceSupport::new();
        ns.push_context();
        ns.declare("", "uri:default").unwrap();
        assert_eq!(ns.resolve_element("e"), ResolveResult::Bound("uri:default"));
        assert_eq!(ns.resolve_attribute("a"), ResolveResult::Unbound);
        ns.push_context();
        ns.declare("", "").unwrap();
        assert_eq!(ns.resolve_element("e"), ResolveResult::Unbound);
    }

    #[test]
    fn reserved_prefixes() {
        let mut ns = NamespaceSupport::new();
        ns.push_context();
        assert_eq!(ns.declare("xml", NS_XML_URI), Ok(()));
        assert_eq!(ns.declare("xml", "uri:x"), Err(NamespaceError::ReservedXml));
        assert_eq!(
            ns.declare("xmlns", "uri:x"),
            Err(NamespaceError::ReservedXmlns)
        );
        assert_eq!(ns.declare("p", NS_XMLNS_URI), Err(NamespaceError::ReservedXmlns));
        assert_eq!(
            ns.declare("p", ""),
            Err(NamespaceError::EmptyPrefixBinding("p".to_string()))
        );
        assert_eq!(ns.find("xml"), Some(NS_XML_URI));
    }

    #[test]
    fn namespace_decl_recognition() {
        assert_eq!(as_namespace_decl("xmlns", "u"), Some(("", "u")));
        assert_eq!(as_namespace_decl("xmlns:p", "u"), Some(("p", "u")));
        assert_eq!(as_namespace_decl("xmlnsp", "u"), None);
        assert!(is_namespace_decl("xmlns"));
        assert!(!is_namespace_decl("p:xmlns"));
    }
}
