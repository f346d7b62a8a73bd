//! The validity driver: child sequences, attribute defaulting and
//! normalization, and the document-wide ID ledger.
//!
//! Violations are plain strings; the parser wraps them into reports with a
//! location and routes them through the error handler, so nothing here is
//! fatal on its own.

use std::collections::HashSet;

use crate::attr::{Attribute, AttributeSet};
use crate::chartype::CharTypeFacet;
use crate::dtd::{AttributeDecl, AttributeType, ContentModel, DefaultDecl, Dtd, ElementType};
use crate::errors::Location;

/// Where an open element stands against its content model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// No declaration, validation off, or `ANY`.
    Anything,
    /// Declared `EMPTY`.
    Empty,
    /// Mixed content; children are checked against the allowed set.
    Mixed,
    /// Element content; tracks the automaton state.
    Children(u32),
}

/// Per-parse validation state.
pub struct Validator {
    ids: HashSet<String>,
    /// `(idref, location)` pairs waiting for their ID, checked at end of
    /// document.
    pending_idrefs: Vec<(String, Location)>,
    facet: CharTypeFacet,
}

impl Validator {
    pub fn new() -> Self {
        Validator {
            ids: HashSet::new(),
            pending_idrefs: Vec::new(),
            facet: CharTypeFacet::get(),
        }
    }

    fn facet(&self) -> CharTypeFacet {
        self.facet
    }

    /// The starting child state for an element, given its declaration.
    pub fn open_element(&self, element: Option<&ElementType>) -> ChildState {
        match element.and_then(|e| e.content.as_ref()) {
            None | Some(ContentModel::Any) => ChildState::Anything,
            Some(ContentModel::Empty) => ChildState::Empty,
            Some(ContentModel::Mixed(_)) => ChildState::Mixed,
            Some(ContentModel::Children(dfa)) => ChildState::Children(dfa.start()),
        }
    }

    /// Checks one child element against its parent's model, advancing the
    /// automaton. Returns a violation message if the child is not allowed.
    pub fn check_child(
        &self,
        dtd: &Dtd,
        parent_name: &str,
        state: &mut ChildState,
        child_name: &str,
    ) -> Option<String> {
        match state {
            ChildState::Anything => None,
            ChildState::Empty => Some(format!(
                "element \"{}\" is declared EMPTY but contains \"{}\"",
                parent_name, child_name
            )),
            ChildState::Mixed => {
                let allowed = match dtd.element(parent_name).and_then(|e| e.content.as_ref()) {
                    Some(ContentModel::Mixed(names)) => names.iter().any(|n| n == child_name),
                    _ => true,
                };
                if allowed {
                    None
                } else {
                    Some(format!(
                        "element \"{}\" is not allowed in the mixed content of \"{}\"",
                        child_name, parent_name
                    ))
                }
            }
            ChildState::Children(dfa_state) => {
                let dfa = match dtd.element(parent_name).and_then(|e| e.content.as_ref()) {
                    Some(ContentModel::Children(dfa)) => dfa,
                    _ => return None,
                };
                match dfa.step(*dfa_state, child_name) {
                    Some(next) => {
                        *dfa_state = next;
                        None
                    }
                    None => {
                        let expected = dfa.expected(*dfa_state);
                        Some(if expected.is_empty() {
                            format!(
                                "element \"{}\" is not allowed here; \"{}\" expects no further children",
                                child_name, parent_name
                            )
                        } else {
                            format!(
                                "element \"{}\" is not allowed here in \"{}\"; expected one of: {}",
                                child_name,
                                parent_name,
                                expected.join(", ")
                            )
                        })
                    }
                }
            }
        }
    }

    /// Checks character data inside an element.
    pub fn check_chardata(
        &self,
        parent_name: &str,
        state: ChildState,
        whitespace_only: bool,
    ) -> Option<String> {
        match state {
            ChildState::Anything | ChildState::Mixed => None,
            ChildState::Empty => Some(format!(
                "element \"{}\" is declared EMPTY but contains character data",
                parent_name
            )),
            ChildState::Children(_) => {
                if whitespace_only {
                    None
                } else {
                    Some(format!(
                        "character data is not allowed in element \"{}\"",
                        parent_name
                    ))
                }
            }
        }
    }

    /// Whether whitespace-only character data in this state is the
    /// "ignorable" kind that element-content models produce.
    pub fn whitespace_is_ignorable(&self, state: ChildState) -> bool {
        matches!(state, ChildState::Children(_))
    }

    /// Checks that a closing element satisfied its model.
    pub fn check_end(
        &self,
        dtd: &Dtd,
        parent_name: &str,
        state: ChildState,
    ) -> Option<String> {
        if let ChildState::Children(dfa_state) = state {
            if let Some(ContentModel::Children(dfa)) =
                dtd.element(parent_name).and_then(|e| e.content.as_ref())
            {
                if !dfa.accepting(dfa_state) {
                    let expected = dfa.expected(dfa_state);
                    return Some(format!(
                        "element \"{}\" ended too early; expected one of: {}",
                        parent_name,
                        expected.join(", ")
                    ));
                }
            }
        }
        None
    }

    /// Applies declared defaults and per-type checks to the attributes of
    /// one start-tag. Collects every violation; the caller decides their
    /// severity (validity errors when validating).
    ///
    /// This runs even when validation is off, because attribute defaulting
    /// and type-aware normalization are DTD effects every conforming
    /// processor applies.
    pub fn process_attributes(
        &mut self,
        dtd: &Dtd,
        element_name: &str,
        element: Option<&ElementType>,
        atts: &mut AttributeSet,
        standalone: bool,
        validating: bool,
        location: &Location,
        violations: &mut Vec<String>,
    ) {
        // Per-type normalization and value checks for what was written.
        for attr in atts.iter_mut() {
            let decl = element.and_then(|e| e.attribute(&attr.qname));
            match decl {
                Some(decl) => {
                    attr.type_name = decl.ty.name();
                    if decl.ty.is_tokenized() {
                        let collapsed = collapse_space(&attr.value);
                        if validating && standalone && decl.external && collapsed != attr.value {
                            violations.push(format!(
                                "attribute \"{}\" of \"{}\" is normalized by an externally \
                                 declared type in a standalone document",
                                attr.qname, element_name
                            ));
                        }
                        attr.value = collapsed;
                    }
                    if let DefaultDecl::Fixed(fixed) = &decl.default {
                        if &attr.value != fixed {
                            violations.push(format!(
                                "attribute \"{}\" of \"{}\" must have the fixed value \"{}\"",
                                attr.qname, element_name, fixed
                            ));
                        }
                    }
                }
                None => {
                    if validating && !crate::name::is_namespace_decl(&attr.qname) {
                        violations.push(format!(
                            "attribute \"{}\" is not declared for element \"{}\"",
                            attr.qname, element_name
                        ));
                    }
                }
            }
        }
        for attr in atts.iter() {
            if let Some(decl) = element.and_then(|e| e.attribute(&attr.qname)) {
                self.check_typed_value(dtd, &decl.ty, attr, location, violations);
            }
        }

        // Defaults for declared attributes absent from the tag.
        if let Some(element) = element {
            for decl in &element.attlist {
                if atts.index_of_qname(&decl.name).is_some() {
                    continue;
                }
                match &decl.default {
                    DefaultDecl::Implied => {}
                    DefaultDecl::Required => {
                        if validating {
                            violations.push(format!(
                                "required attribute \"{}\" is missing on \"{}\"",
                                decl.name, element_name
                            ));
                        }
                    }
                    DefaultDecl::Fixed(value) | DefaultDecl::Default(value) => {
                        if validating && standalone && decl.external {
                            violations.push(format!(
                                "attribute \"{}\" of \"{}\" is defaulted from an external \
                                 declaration in a standalone document",
                                decl.name, element_name
                            ));
                        }
                        let value = if decl.ty.is_tokenized() {
                            collapse_space(value)
                        } else {
                            value.clone()
                        };
                        let attr = Attribute {
                            qname: decl.name.clone(),
                            uri: None,
                            type_name: decl.ty.name(),
                            value,
                            specified: false,
                        };
                        self.check_typed_value(dtd, &decl.ty, &attr, location, violations);
                        atts.push_default(attr);
                    }
                }
            }
        }
    }

    fn check_typed_value(
        &mut self,
        dtd: &Dtd,
        ty: &AttributeType,
        attr: &Attribute,
        location: &Location,
        violations: &mut Vec<String>,
    ) {
        let facet = self.facet();
        match ty {
            AttributeType::Cdata => {}
            AttributeType::Id => {
                if !facet.is_name(&attr.value) {
                    violations.push(format!(
                        "ID value \"{}\" is not a valid name",
                        attr.value
                    ));
                } else if !self.ids.insert(attr.value.clone()) {
                    violations.push(format!("ID \"{}\" is already in use", attr.value));
                }
            }
            AttributeType::Idref => {
                self.record_idref(&attr.value, facet, location, violations);
            }
            AttributeType::Idrefs => {
                for token in attr.value.split(' ').filter(|t| !t.is_empty()) {
                    self.record_idref(token, facet, location, violations);
                }
            }
            AttributeType::Entity => {
                self.check_entity_token(dtd, &attr.value, violations);
            }
            AttributeType::Entities => {
                for token in attr.value.split(' ').filter(|t| !t.is_empty()) {
                    self.check_entity_token(dtd, token, violations);
                }
            }
            AttributeType::Nmtoken => {
                if !facet.is_nmtoken(&attr.value) {
                    violations.push(format!(
                        "value \"{}\" is not a valid name token",
                        attr.value
                    ));
                }
            }
            AttributeType::Nmtokens => {
                let mut any = false;
                for token in attr.value.split(' ').filter(|t| !t.is_empty()) {
                    any = true;
                    if !facet.is_nmtoken(token) {
                        violations.push(format!("value \"{}\" is not a valid name token", token));
                    }
                }
                if !any {
                    violations.push("NMTOKENS value is empty".to_string());
                }
            }
            AttributeType::Notation(allowed) => {
                if !allowed.iter().any(|n| n == &attr.value) {
                    violations.push(format!(
                        "notation \"{}\" is not among the declared choices",
                        attr.value
                    ));
                } else if dtd.notation(&attr.value).is_none() {
                    violations.push(format!("notation \"{}\" is not declared", attr.value));
                }
            }
            AttributeType::Enumeration(allowed) => {
                if !allowed.iter().any(|n| n == &attr.value) {
                    violations.push(format!(
                        "value \"{}\" is not among the enumerated choices",
                        attr.value
                    ));
                }
            }
        }
    }

    fn record_idref(
        &mut self,
        value: &str,
        facet: CharTypeFacet,
        location: &Location,
        violations: &mut Vec<String>,
    ) {
        if !facet.is_name(value) {
            violations.push(format!("IDREF value \"{}\" is not a valid name", value));
        } else {
            self.pending_idrefs
                .push((value.to_string(), location.clone()));
        }
    }

    fn check_entity_token(&self, dtd: &Dtd, token: &str, violations: &mut Vec<String>) {
        match dtd.general_entity(token) {
            Some(decl) if decl.is_unparsed() => {}
            Some(_) => violations.push(format!(
                "entity \"{}\" is parsed; ENTITY attributes must name unparsed entities",
                token
            )),
            None => violations.push(format!("entity \"{}\" is not declared", token)),
        }
    }

    /// Validity checks on an attribute definition itself, applied when the
    /// `ATTLIST` is parsed: one ID attribute per element, and ID defaults
    /// restricted to `#IMPLIED`/`#REQUIRED`.
    pub fn check_attribute_decl(
        element: Option<&ElementType>,
        decl: &AttributeDecl,
    ) -> Vec<String> {
        let mut violations = Vec::new();
        if decl.ty == AttributeType::Id {
            match &decl.default {
                DefaultDecl::Implied | DefaultDecl::Required => {}
                _ => violations.push(format!(
                    "ID attribute \"{}\" must be #IMPLIED or #REQUIRED",
                    decl.name
                )),
            }
            if let Some(existing) = element.and_then(|e| e.id_attribute()) {
                violations.push(format!(
                    "element already has the ID attribute \"{}\"; \"{}\" cannot be a second one",
                    existing.name, decl.name
                ));
            }
        }
        violations
    }

    /// End-of-document check: every IDREF must have found its ID.
    pub fn finish(&mut self) -> Vec<(String, Location)> {
        let ids = &self.ids;
        self.pending_idrefs
            .drain(..)
            .filter(|(id, _)| !ids.contains(id))
            .map(|(id, loc)| (format!("IDREF \"{}\" does not match any ID", id), loc))
            .collect()
    }
}

/// The collapse half of attribute-value normalization: leading and trailing
/// spaces go, internal runs become a single space. Literal whitespace was
/// already turned into plain spaces while the value was scanned.
pub fn collapse_space(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if c == ' ' {
            in_run = true;
        } else {
            if in_run && !out.is_empty() {
                out.push(' ');
            }
            in_run = false;
            out.push(c);
        }
    }
    out
}
