//! The DTD model: everything the prolog declares.
//!
//! Element types live in an arena indexed by [`ElementIndex`]; attribute
//! lists hang off their element even when the `ATTLIST` arrives before the
//! `ELEMENT` declaration. The model is built while the prolog is parsed and
//! frozen before element content begins; afterwards it only answers
//! queries.

pub mod content;
pub mod validator;

use std::collections::HashMap;

pub use self::content::{ContentSpec, Dfa};

/// Arena handle for an element type.
pub type ElementIndex = usize;

/// The constraint on an element's children.
#[derive(Debug, Clone)]
pub enum ContentModel {
    /// `EMPTY`: no children, no character data.
    Empty,
    /// `ANY`: any well-formed content.
    Any,
    /// `(#PCDATA | a | b)*`: character data mixed with the named elements.
    Mixed(Vec<String>),
    /// Element content, compiled to a deterministic automaton.
    Children(Dfa),
}

/// The ten attribute types of XML 1.0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    Cdata,
    Id,
    Idref,
    Idrefs,
    Entity,
    Entities,
    Nmtoken,
    Nmtokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

impl AttributeType {
    /// The type name reported through the attribute set. Enumerations that
    /// are not notations report `NMTOKEN`, as SAX requires.
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Cdata => "CDATA",
            AttributeType::Id => "ID",
            AttributeType::Idref => "IDREF",
            AttributeType::Idrefs => "IDREFS",
            AttributeType::Entity => "ENTITY",
            AttributeType::Entities => "ENTITIES",
            AttributeType::Nmtoken => "NMTOKEN",
            AttributeType::Nmtokens => "NMTOKENS",
            AttributeType::Notation(_) => "NOTATION",
            AttributeType::Enumeration(_) => "NMTOKEN",
        }
    }

    /// Tokenized types get the collapse half of attribute-value
    /// normalization; CDATA keeps its spaces.
    pub fn is_tokenized(&self) -> bool {
        !matches!(self, AttributeType::Cdata)
    }
}

/// What happens when an attribute is absent from a start-tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultDecl {
    Required,
    Implied,
    Fixed(String),
    Default(String),
}

/// One attribute declaration from an `ATTLIST`.
#[derive(Debug, Clone)]
pub struct AttributeDecl {
    pub name: String,
    pub ty: AttributeType,
    pub default: DefaultDecl,
    /// Declared in the external subset or a parameter entity; matters for
    /// documents that claim `standalone="yes"`.
    pub external: bool,
}

/// One element type, with whatever has been declared about it so far.
#[derive(Debug, Clone)]
pub struct ElementType {
    pub name: String,
    /// `None` until an `ELEMENT` declaration arrives. Attribute lists may
    /// exist on undeclared elements.
    pub content: Option<ContentModel>,
    pub attlist: Vec<AttributeDecl>,
}

impl ElementType {
    pub fn declared(&self) -> bool {
        self.content.is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attlist.iter().find(|a| a.name == name)
    }

    /// The declared ID attribute, if any. At most one may exist.
    pub fn id_attribute(&self) -> Option<&AttributeDecl> {
        self.attlist.iter().find(|a| a.ty == AttributeType::Id)
    }
}

/// Replacement text or external identifier of a declared entity.
#[derive(Debug, Clone)]
pub enum EntityBody {
    Internal {
        text: String,
    },
    ExternalParsed {
        system_id: String,
        public_id: Option<String>,
        base_uri: String,
    },
    Unparsed {
        system_id: String,
        public_id: Option<String>,
        base_uri: String,
        notation: String,
    },
}

#[derive(Debug, Clone)]
pub struct EntityDecl {
    pub name: String,
    pub parameter: bool,
    pub body: EntityBody,
    /// Declared in the external subset or a parameter entity.
    pub external: bool,
}

impl EntityDecl {
    pub fn is_unparsed(&self) -> bool {
        matches!(self.body, EntityBody::Unparsed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct NotationDecl {
    pub name: String,
    pub system_id: Option<String>,
    pub public_id: Option<String>,
}

/// External identifier of the external subset, as written in the DOCTYPE.
#[derive(Debug, Clone)]
pub struct ExternalId {
    pub system_id: String,
    pub public_id: Option<String>,
}

/// Everything the DTD declared, plus the flags the parser needs to grade
/// undeclared-entity references.
#[derive(Debug, Default)]
pub struct Dtd {
    /// Root element name from the DOCTYPE declaration.
    pub root_name: Option<String>,
    /// External subset identifier, when the DOCTYPE carries one.
    pub external_id: Option<ExternalId>,
    elements: Vec<ElementType>,
    element_index: HashMap<String, ElementIndex>,
    general: HashMap<String, EntityDecl>,
    parameter: HashMap<String, EntityDecl>,
    notations: HashMap<String, NotationDecl>,
    /// True once any parameter-entity reference was seen; together with
    /// `external_id` this decides whether an undeclared entity reference is
    /// fatal or merely reportable.
    pub saw_parameter_reference: bool,
    /// The external subset was actually read.
    pub loaded_external_subset: bool,
    frozen: bool,
}

impl Dtd {
    pub fn new() -> Self {
        Dtd::default()
    }

    /// Whether a DOCTYPE declaration was present at all.
    pub fn present(&self) -> bool {
        self.root_name.is_some()
    }

    /// No external declarations can have been missed, so an undeclared
    /// entity reference violates well-formedness rather than validity.
    pub fn entity_declarations_complete(&self, standalone: bool) -> bool {
        standalone || (self.external_id.is_none() && !self.saw_parameter_reference)
    }

    pub fn element(&self, name: &str) -> Option<&ElementType> {
        self.element_index.get(name).map(|&i| &self.elements[i])
    }

    pub fn element_at(&self, index: ElementIndex) -> &ElementType {
        &self.elements[index]
    }

    pub fn element_lookup(&self, name: &str) -> Option<ElementIndex> {
        self.element_index.get(name).copied()
    }

    fn intern_element(&mut self, name: &str) -> ElementIndex {
        if let Some(&i) = self.element_index.get(name) {
            return i;
        }
        let index = self.elements.len();
        self.elements.push(ElementType {
            name: name.to_string(),
            content: None,
            attlist: Vec::new(),
        });
        self.element_index.insert(name.to_string(), index);
        index
    }

    /// Records an element declaration. Returns `false` when the element was
    /// already declared, which is a validity error the caller reports.
    pub fn declare_element(&mut self, name: &str, model: ContentModel) -> bool {
        debug_assert!(!self.frozen);
        let index = self.intern_element(name);
        if self.elements[index].content.is_some() {
            return false;
        }
        self.elements[index].content = Some(model);
        true
    }

    /// Records one attribute definition. Returns `false` when the attribute
    /// was already declared for this element; the first declaration wins.
    pub fn declare_attribute(&mut self, element: &str, decl: AttributeDecl) -> bool {
        debug_assert!(!self.frozen);
        let index = self.intern_element(element);
        if self.elements[index].attribute(&decl.name).is_some() {
            return false;
        }
        self.elements[index].attlist.push(decl);
        true
    }

    /// Records an entity declaration. The first declaration of a name wins;
    /// a repeat returns `false` and warrants a warning.
    pub fn declare_entity(&mut self, decl: EntityDecl) -> bool {
        debug_assert!(!self.frozen);
        let table = if decl.parameter {
            &mut self.parameter
        } else {
            &mut self.general
        };
        if table.contains_key(&decl.name) {
            return false;
        }
        table.insert(decl.name.clone(), decl);
        true
    }

    /// Records a notation declaration; duplicate names are a validity
    /// error, reported by the caller when this returns `false`.
    pub fn declare_notation(&mut self, decl: NotationDecl) -> bool {
        debug_assert!(!self.frozen);
        if self.notations.contains_key(&decl.name) {
            return false;
        }
        self.notations.insert(decl.name.clone(), decl);
        true
    }

    pub fn general_entity(&self, name: &str) -> Option<&EntityDecl> {
        self.general.get(name)
    }

    pub fn parameter_entity(&self, name: &str) -> Option<&EntityDecl> {
        self.parameter.get(name)
    }

    pub fn notation(&self, name: &str) -> Option<&NotationDecl> {
        self.notations.get(name)
    }

    pub fn notations(&self) -> impl Iterator<Item = &NotationDecl> {
        self.notations.values()
    }

    /// Ends the build phase; the model only answers queries from here on.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Public identifiers compare after whitespace normalization: runs of
/// space, tab and line ends become a single space, ends trimmed.
pub(crate) fn normalize_public_id(public_id: &str) -> String {
    let mut out = String::with_capacity(public_id.len());
    let mut pending_space = false;
    for c in public_id.chars() {
        if matches!(c, ' ' | '\t' | '\r' | '\n') {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn public_id_normalization() {
        assert_eq!(
            normalize_public_id("  -//Acme//DTD\t\nThing//EN "),
            "-//Acme//DTD Thing//EN"
        );
    }

    #[test]
    fn attlist_before_element_declaration() {
        let mut dtd = Dtd::new();
        assert!(dtd.declare_attribute(
            "r",
            AttributeDecl {
                name: "a".to_string(),
                ty: AttributeType::Cdata,
                default: DefaultDecl::Implied,
                external: false,
            },
        ));
        let elem = dtd.element("r").unwrap();
        assert!(!elem.declared());
        assert!(elem.attribute("a").is_some());

        assert!(dtd.declare_element("r", ContentModel::Empty));
        assert!(dtd.element("r").unwrap().declared());
        // A second element declaration is refused.
        assert!(!dtd.declare_element("r", ContentModel::Any));
    }

    #[test]
    fn first_attribute_declaration_wins() {
        let mut dtd = Dtd::new();
        assert!(dtd.declare_attribute(
            "r",
            AttributeDecl {
                name: "a".to_string(),
                ty: AttributeType::Cdata,
                default: DefaultDecl::Default("first".to_string()),
                external: false,
            },
        ));
        assert!(!dtd.declare_attribute(
            "r",
            AttributeDecl {
                name: "a".to_string(),
                ty: AttributeType::Cdata,
                default: DefaultDecl::Default("second".to_string()),
                external: false,
            },
        ));
        match &dtd.element("r").unwrap().attribute("a").unwrap().default {
            DefaultDecl::Default(v) => assert_eq!(v, "first"),
            other => panic!("unexpected default {:?}", other),
        }
    }

    #[test]
    fn first_entity_declaration_wins() {
        let mut dtd = Dtd::new();
        let decl = |text: &str| EntityDecl {
            name: "e".to_string(),
            parameter: false,
            body: EntityBody::Internal {
                text: text.to_string(),
            },
            external: false,
        };
        assert!(dtd.declare_entity(decl("one")));
        assert!(!dtd.declare_entity(decl("two")));
        match &dtd.general_entity("e").unwrap().body {
            EntityBody::Internal { text } => assert_eq!(text, "one"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn entity_declarations_complete_logic() {
        let mut dtd = Dtd::new();
        assert!(dtd.entity_declarations_complete(false));
        dtd.external_id = Some(ExternalId {
            system_id: "x.dtd".to_string(),
            public_id: None,
        });
        assert!(!dtd.entity_declarations_complete(false));
        assert!(dtd.entity_declarations_complete(true));
    }
}
