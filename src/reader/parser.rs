//! The document state machine: prolog, element tree, epilog.
//!
//! A [`ParseSession`] owns everything with per-parse lifetime — the entity
//! stack, the namespace stack, the DTD under construction, the validator,
//! pending character data — and borrows the reader for its handlers and
//! configuration. Recoverable problems are routed through the error handler
//! and parsing continues; fatal ones unwind through `Result` after the
//! `fatal_error` callback, with `end_document` still delivered at the top.

use std::sync::Arc;

use crate::attr::{Attribute, AttributeSet};
use crate::chartype::{is_whitespace, CharTypeFacet};
use crate::dtd::validator::{ChildState, Validator};
use crate::dtd::{Dtd, EntityBody};
use crate::encoding::ConverterRegistry;
use crate::entity::{EntityFrame, EntityManager, FrameKind, MAX_ENTITY_DEPTH};
use crate::errors::{Error, ParseError, Result, Severity};
use crate::handler::DocumentLocator;
use crate::input::{open_system_id, resolve_uri, EntityInput};
use crate::name::{
    as_namespace_decl, check_qname_shape, is_namespace_decl, split_qname, ResolveResult,
    NamespaceSupport,
};
use crate::reader::XmlReader;

/// One element on the open-element stack.
pub(crate) struct OpenElement {
    pub qname: String,
    pub local: String,
    pub uri: Option<String>,
    /// Entity frame the start-tag was read from; the end-tag must match.
    pub frame_id: u64,
    pub child_state: ChildState,
}

/// Everything alive for the duration of one `parse` call.
pub(crate) struct ParseSession<'r, 'h, 'i> {
    pub(crate) r: &'r mut XmlReader<'h>,
    pub(crate) em: EntityManager<'i>,
    pub(crate) ns: NamespaceSupport,
    pub(crate) dtd: Dtd,
    pub(crate) validator: Validator,
    pub(crate) registry: Arc<ConverterRegistry>,
    pub(crate) facet: CharTypeFacet,
    locator: DocumentLocator,
    open: Vec<OpenElement>,
    /// Pending character data, coalesced until the next markup event.
    text: String,
    text_ws_only: bool,
    pub(crate) standalone: bool,
    atts: AttributeSet,
    /// True while declarations are being read from the external subset.
    pub(crate) dtd_external: bool,
    /// `(owner, notation)` pairs whose notation must exist by the end of
    /// the DTD.
    pub(crate) pending_notation_refs: Vec<(String, String)>,
}

impl<'r, 'h, 'i> ParseSession<'r, 'h, 'i> {
    pub(crate) fn run(reader: &'r mut XmlReader<'h>, input: EntityInput<'i>) -> Result<()> {
        let registry = reader.registry.clone();
        let policies = reader.config.policies;
        let read_limit = reader.config.read_limit;
        let mut session = ParseSession {
            em: EntityManager::new(registry.clone(), policies, read_limit),
            ns: NamespaceSupport::new(),
            dtd: Dtd::new(),
            validator: Validator::new(),
            registry,
            facet: CharTypeFacet::get(),
            locator: DocumentLocator::new(),
            open: Vec::new(),
            text: String::new(),
            text_ws_only: true,
            standalone: false,
            atts: AttributeSet::new(),
            dtd_external: false,
            pending_notation_refs: Vec::new(),
            r: reader,
        };
        // Input that cannot even be opened fails before any event.
        session.em.push_document(input)?;

        if let Some(h) = session.r.content.as_deref_mut() {
            h.set_document_locator(session.locator.clone());
        }

        let result = session.parse_document();
        session.em.unwind();
        session.r.standalone = session.standalone;

        let result = match result {
            Ok(()) => Ok(()),
            // The cancellation signal suppresses all further events.
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(Error::Parse(e)) => Err(Error::Parse(e)),
            // IO and decoding failures mid-parse become fatal reports.
            Err(other) => Err(session.promote_to_fatal(other)?),
        };

        if let Some(h) = session.r.content.as_deref_mut() {
            h.end_document()?;
        }
        result
    }

    // ------------------------------------------------------------------
    // Error reporting

    fn make_error(&self, severity: Severity, message: String) -> ParseError {
        let mut err = ParseError::new(severity, message, self.em.location());
        err.trace = self.em.position_trace();
        err
    }

    pub(crate) fn warning(&mut self, message: String) -> Result<()> {
        let err = self.make_error(Severity::Warning, message);
        log::debug!("{}", err);
        if let Some(h) = self.r.error.as_deref_mut() {
            h.warning(&err)?;
        }
        Ok(())
    }

    /// Reports a recoverable (validity-grade) error and continues.
    pub(crate) fn error(&mut self, message: String) -> Result<()> {
        let err = self.make_error(Severity::Error, message);
        log::debug!("{}", err);
        if let Some(h) = self.r.error.as_deref_mut() {
            h.error(&err)?;
        }
        Ok(())
    }

    /// Reports a fatal error and returns it for propagation. No further
    /// content events are produced after this.
    pub(crate) fn fatal<T>(&mut self, message: String) -> Result<T> {
        let err = self.make_error(Severity::Fatal, message);
        log::debug!("{}", err);
        if let Some(h) = self.r.error.as_deref_mut() {
            h.fatal_error(&err)?;
        }
        Err(Error::Parse(Box::new(err)))
    }

    /// Wraps a transport-level failure (IO, decoding) into a fatal report.
    fn promote_to_fatal(&mut self, cause: Error) -> Result<Error> {
        let mut err = self.make_error(Severity::Fatal, cause.to_string());
        err.cause = Some(Box::new(cause));
        if let Some(h) = self.r.error.as_deref_mut() {
            h.fatal_error(&err)?;
        }
        Ok(Error::Parse(Box::new(err)))
    }

    pub(crate) fn update_locator(&mut self) {
        self.locator.update(self.em.location());
    }

    /// Whether a declaration read right now counts as externally declared
    /// for the standalone rules.
    pub(crate) fn external_decl_context(&self) -> bool {
        self.dtd_external || self.em.in_external_dtd()
    }

    // ------------------------------------------------------------------
    // Scanner shorthand

    pub(crate) fn peek0(&mut self) -> Result<Option<char>> {
        self.em.current().scanner.peek(0)
    }

    pub(crate) fn peek_at(&mut self, n: usize) -> Result<Option<char>> {
        self.em.current().scanner.peek(n)
    }

    pub(crate) fn advance(&mut self) -> Result<Option<char>> {
        self.em.current().scanner.advance()
    }

    pub(crate) fn try_match(&mut self, literal: &str) -> Result<bool> {
        self.em.current().scanner.try_match(literal)
    }

    pub(crate) fn skip_space(&mut self) -> Result<usize> {
        self.em.current().scanner.skip_while(is_whitespace)
    }

    pub(crate) fn expect(&mut self, wanted: char) -> Result<()> {
        match self.advance()? {
            Some(c) if c == wanted => Ok(()),
            Some(c) => self.fatal(format!("expected \"{}\", found \"{}\"", wanted, c)),
            None => self.fatal(format!("expected \"{}\", found end of input", wanted)),
        }
    }

    /// Reads a `Name` production.
    pub(crate) fn read_name(&mut self) -> Result<String> {
        let facet = self.facet;
        match self.peek0()? {
            Some(c) if facet.is_name_start_char(c) => {}
            Some(c) => return self.fatal(format!("expected a name, found \"{}\"", c)),
            None => return self.fatal("expected a name, found end of input".to_string()),
        }
        let mut name = String::new();
        self.em
            .current()
            .scanner
            .take_while(|c| facet.is_name_char(c), &mut name)?;
        Ok(name)
    }

    /// Reads an `Nmtoken` production.
    pub(crate) fn read_nmtoken(&mut self) -> Result<String> {
        let facet = self.facet;
        let mut token = String::new();
        self.em
            .current()
            .scanner
            .take_while(|c| facet.is_name_char(c), &mut token)?;
        if token.is_empty() {
            return self.fatal("expected a name token".to_string());
        }
        Ok(token)
    }

    // ------------------------------------------------------------------
    // Document structure

    fn parse_document(&mut self) -> Result<()> {
        let declared = self.parse_xml_decl()?;
        {
            let registry = self.registry.clone();
            let scanner = &mut self.em.current().scanner;
            if let Err(e) = scanner.finalize_encoding(declared.as_deref(), &registry) {
                return self.fatal(e.to_string());
            }
        }

        self.update_locator();
        if let Some(h) = self.r.content.as_deref_mut() {
            h.start_document()?;
        }

        self.parse_misc()?;
        if self.starts_with_doctype()? {
            self.parse_doctype()?;
            self.parse_misc()?;
        }
        self.dtd.freeze();

        match self.peek0()? {
            Some('<') => self.parse_element_tree()?,
            Some(c) => {
                return self.fatal(format!(
                    "expected the document element, found \"{}\"",
                    c
                ))
            }
            None => return self.fatal("no root element".to_string()),
        }

        self.parse_misc()?;
        match self.peek0()? {
            None => {}
            Some(_) => return self.fatal("content after the document element".to_string()),
        }

        if self.r.config.validation {
            for (message, location) in self.validator.finish() {
                let mut err = ParseError::new(Severity::Error, message, location);
                err.trace = Vec::new();
                if let Some(h) = self.r.error.as_deref_mut() {
                    h.error(&err)?;
                }
            }
        }
        Ok(())
    }

    /// Recognizes the XML declaration at the very start of the document
    /// entity. Returns the declared encoding label, if any.
    fn parse_xml_decl(&mut self) -> Result<Option<String>> {
        let mark = self.em.current().scanner.mark();
        if self.try_match("<?xml")? && matches!(self.peek0()?, Some(c) if is_whitespace(c)) {
            self.em.current().scanner.release(mark);
            let (version, encoding, standalone) = self.parse_decl_pseudo_attrs(true)?;
            match version.as_deref() {
                Some("1.0") => {}
                Some(other) => {
                    let other = other.to_string();
                    return self.fatal(format!("unsupported XML version \"{}\"", other));
                }
                None => return self.fatal("XML declaration without a version".to_string()),
            }
            self.standalone = standalone.unwrap_or(false);
            Ok(encoding)
        } else {
            self.em.current().scanner.reset(mark)?;
            Ok(None)
        }
    }

    /// Recognizes the text declaration of an external entity that was just
    /// pushed, and finalizes that entity's encoding.
    pub(crate) fn parse_text_decl(&mut self) -> Result<()> {
        let mark = self.em.current().scanner.mark();
        let declared = if self.try_match("<?xml")?
            && matches!(self.peek0()?, Some(c) if is_whitespace(c))
        {
            self.em.current().scanner.release(mark);
            let (_, encoding, _) = self.parse_decl_pseudo_attrs(false)?;
            encoding
        } else {
            self.em.current().scanner.reset(mark)?;
            None
        };
        let registry = self.registry.clone();
        if let Err(e) = self
            .em
            .current()
            .scanner
            .finalize_encoding(declared.as_deref(), &registry)
        {
            return self.fatal(e.to_string());
        }
        Ok(())
    }

    /// The pseudo-attributes of an XML or text declaration, through the
    /// closing `?>`. `document` selects the XMLDecl grammar (version
    /// mandatory, standalone allowed).
    fn parse_decl_pseudo_attrs(
        &mut self,
        document: bool,
    ) -> Result<(Option<String>, Option<String>, Option<bool>)> {
        let mut version = None;
        let mut encoding = None;
        let mut standalone = None;
        let mut position = 0;
        loop {
            let had_space = self.skip_space()? > 0;
            if self.try_match("?>")? {
                break;
            }
            if !had_space {
                return self.fatal("expected whitespace in XML declaration".to_string());
            }
            let name = self.read_name()?;
            self.skip_space()?;
            self.expect('=')?;
            self.skip_space()?;
            let value = self.read_quoted_literal()?;
            match (name.as_str(), position) {
                ("version", 0) => version = Some(value),
                ("encoding", _) if encoding.is_none() && (version.is_some() || !document) => {
                    encoding = Some(value)
                }
                ("standalone", _) if document && standalone.is_none() => {
                    standalone = Some(match value.as_str() {
                        "yes" => true,
                        "no" => false,
                        other => {
                            let other = other.to_string();
                            return self.fatal(format!(
                                "standalone must be \"yes\" or \"no\", found \"{}\"",
                                other
                            ));
                        }
                    })
                }
                _ => {
                    return self.fatal(format!(
                        "unexpected \"{}\" in XML declaration",
                        name
                    ))
                }
            }
            position += 1;
        }
        Ok((version, encoding, standalone))
    }

    /// A plain quoted literal with no reference processing, as used in
    /// declarations.
    pub(crate) fn read_quoted_literal(&mut self) -> Result<String> {
        let quote = match self.advance()? {
            Some(c @ '"') | Some(c @ '\'') => c,
            _ => return self.fatal("expected a quoted literal".to_string()),
        };
        let mut value = String::new();
        loop {
            match self.advance()? {
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
                None => return self.fatal("unterminated literal".to_string()),
            }
        }
        Ok(value)
    }

    /// `Misc*`: whitespace, comments and processing instructions between
    /// the document's major pieces. Whitespace here belongs to no one and
    /// is not reported.
    fn parse_misc(&mut self) -> Result<()> {
        loop {
            self.skip_space()?;
            if self.try_match("<!--")? {
                self.parse_comment()?;
            } else if self.starts_with_pi()? {
                self.advance()?;
                self.advance()?;
                self.parse_pi()?;
            } else {
                return Ok(());
            }
        }
    }

    fn starts_with_doctype(&mut self) -> Result<bool> {
        let scanner = &mut self.em.current().scanner;
        let mark = scanner.mark();
        let matched = scanner.try_match("<!DOCTYPE")?;
        scanner.reset(mark)?;
        Ok(matched)
    }

    fn starts_with_pi(&mut self) -> Result<bool> {
        Ok(self.peek0()? == Some('<') && self.peek_at(1)? == Some('?'))
    }

    // ------------------------------------------------------------------
    // Element tree

    fn parse_element_tree(&mut self) -> Result<()> {
        self.parse_start_tag()?;
        while !self.open.is_empty() {
            match self.peek0()? {
                None => {
                    if self.em.depth() > 1 {
                        let frame = self.em.pop().expect("depth checked");
                        self.emit_end_entity(&frame)?;
                        continue;
                    }
                    let unclosed = self.open.last().map(|e| e.qname.clone()).unwrap_or_default();
                    return self.fatal(format!(
                        "unexpected end of document: \"{}\" is not closed",
                        unclosed
                    ));
                }
                Some('<') => match self.peek_at(1)? {
                    Some('/') => {
                        self.flush_text()?;
                        self.parse_end_tag()?;
                    }
                    Some('!') => {
                        if self.try_match("<!--")? {
                            if self.r.lexical.is_some() {
                                self.flush_text()?;
                            }
                            self.parse_comment()?;
                        } else if self.try_match("<![CDATA[")? {
                            self.parse_cdata()?;
                        } else {
                            return self.fatal("unexpected markup in content".to_string());
                        }
                    }
                    Some('?') => {
                        self.flush_text()?;
                        self.advance()?;
                        self.advance()?;
                        self.parse_pi()?;
                    }
                    Some(_) => {
                        self.flush_text()?;
                        self.parse_start_tag()?;
                    }
                    None => return self.fatal("unexpected end of input after \"<\"".to_string()),
                },
                Some('&') => self.parse_content_reference()?,
                Some(_) => self.parse_chardata()?,
            }
        }
        Ok(())
    }

    fn parse_chardata(&mut self) -> Result<()> {
        loop {
            let c = match self.peek0()? {
                None => return Ok(()),
                Some(c) => c,
            };
            match c {
                '<' | '&' => return Ok(()),
                ']' => {
                    if self.try_match("]]>")? {
                        return self.fatal("\"]]>\" is not allowed in character data".to_string());
                    }
                    self.advance()?;
                    self.text.push(']');
                    self.text_ws_only = false;
                }
                c if !self.facet.is_char(c) => {
                    return self.fatal(format!(
                        "character U+{:04X} is not allowed in XML content",
                        c as u32
                    ));
                }
                c => {
                    self.advance()?;
                    self.text.push(c);
                    self.text_ws_only &= is_whitespace(c);
                }
            }
        }
    }

    /// Delivers pending character data, deciding between `characters` and
    /// `ignorable_whitespace`.
    fn flush_text(&mut self) -> Result<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        let ws_only = std::mem::replace(&mut self.text_ws_only, true);
        let state = match self.open.last() {
            Some(open) => open.child_state,
            None => return Ok(()),
        };
        self.update_locator();
        if ws_only && self.dtd.present() && self.validator.whitespace_is_ignorable(state) {
            if let Some(h) = self.r.content.as_deref_mut() {
                h.ignorable_whitespace(&text)?;
            }
            return Ok(());
        }
        if self.r.config.validation {
            let parent = self.open.last().map(|e| e.qname.clone()).unwrap_or_default();
            if let Some(v) = self.validator.check_chardata(&parent, state, ws_only) {
                self.error(v)?;
            }
        }
        if let Some(h) = self.r.content.as_deref_mut() {
            h.characters(&text)?;
        }
        Ok(())
    }

    /// `flush_text` only when a lexical event is about to interleave; plain
    /// discarded comments keep character data coalescing.
    fn flush_text_if_lexical(&mut self) -> Result<()> {
        if self.r.lexical.is_some() {
            self.flush_text()?;
        }
        Ok(())
    }

    fn parse_start_tag(&mut self) -> Result<()> {
        let frame_id = self.em.current_id();
        self.expect('<')?;
        let qname = self.read_name()?;
        self.atts.clear();
        let mut empty = false;
        loop {
            let had_space = self.skip_space()? > 0;
            match self.peek0()? {
                Some('>') => {
                    self.advance()?;
                    break;
                }
                Some('/') => {
                    self.advance()?;
                    self.expect('>')?;
                    empty = true;
                    break;
                }
                Some(c) if self.facet.is_name_start_char(c) => {
                    if !had_space {
                        return self.fatal("expected whitespace before attribute".to_string());
                    }
                    let name = self.read_name()?;
                    self.skip_space()?;
                    self.expect('=')?;
                    self.skip_space()?;
                    let value = self.scan_attribute_literal()?;
                    let record = Attribute {
                        qname: name,
                        uri: None,
                        type_name: "CDATA",
                        value,
                        specified: true,
                    };
                    if !self.atts.push_checked(record) {
                        return self.fatal(format!(
                            "duplicate attribute in element \"{}\"",
                            qname
                        ));
                    }
                }
                Some(c) => {
                    return self.fatal(format!(
                        "unexpected \"{}\" in start-tag of \"{}\"",
                        c, qname
                    ))
                }
                None => {
                    return self.fatal(format!("unexpected end of input in \"<{}\"", qname))
                }
            }
        }
        debug_assert_eq!(frame_id, self.em.current_id());

        // DTD effects first: defaults may add namespace declarations.
        let element_known = self.dtd.element_lookup(&qname);
        if self.open.is_empty() {
            if self.r.config.validation && self.dtd.present() {
                if self.dtd.root_name.as_deref() != Some(qname.as_str()) {
                    let declared_root = self.dtd.root_name.clone().unwrap_or_default();
                    self.error(format!(
                        "document element is \"{}\" but the DOCTYPE names \"{}\"",
                        qname, declared_root
                    ))?;
                }
            }
        }
        if self.r.config.validation
            && self.dtd.present()
            && element_known.map_or(true, |i| !self.dtd.element_at(i).declared())
        {
            self.error(format!("element \"{}\" is not declared", qname))?;
        }
        let mut violations = Vec::new();
        {
            let location = self.em.location();
            let element = element_known.map(|i| self.dtd.element_at(i));
            let standalone = self.standalone;
            let validating = self.r.config.validation && self.dtd.present();
            self.validator.process_attributes(
                &self.dtd,
                &qname,
                element,
                &mut self.atts,
                standalone,
                validating,
                &location,
                &mut violations,
            );
        }
        if self.r.config.validation {
            for violation in violations {
                self.error(violation)?;
            }
        }

        // Namespace processing over the final attribute set.
        let mut started_prefixes: Vec<(String, String)> = Vec::new();
        let mut uri = None;
        if self.r.config.namespaces {
            check_qname_shape(&qname)
                .or_else(|_| self.fatal(format!("\"{}\" is not a valid qualified name", qname)))?;
            self.ns.push_context();
            for attr in self.atts.iter() {
                if let Some((prefix, value)) = as_namespace_decl(&attr.qname, &attr.value) {
                    started_prefixes.push((prefix.to_string(), value.to_string()));
                }
            }
            for (prefix, value) in &started_prefixes {
                if let Err(e) = self.ns.declare(prefix, value) {
                    let message = e.to_string();
                    return self.fatal(message);
                }
            }
            uri = match self.ns.resolve_element(&qname) {
                ResolveResult::Bound(u) => Some(u.to_string()),
                ResolveResult::Unbound => None,
                ResolveResult::Unknown => {
                    let prefix = split_qname(&qname).0.unwrap_or_default().to_string();
                    return self.fatal(format!("prefix \"{}\" is not declared", prefix));
                }
            };
            let mut unknown_prefix: Option<String> = None;
            let resolved: Vec<Option<String>> = self
                .atts
                .iter()
                .map(|attr| {
                    if is_namespace_decl(&attr.qname) {
                        None
                    } else {
                        match self.ns.resolve_attribute(&attr.qname) {
                            ResolveResult::Bound(u) => Some(u.to_string()),
                            ResolveResult::Unbound => None,
                            ResolveResult::Unknown => {
                                unknown_prefix = split_qname(&attr.qname).0.map(str::to_string);
                                None
                            }
                        }
                    }
                })
                .collect();
            if let Some(prefix) = unknown_prefix {
                return self.fatal(format!("prefix \"{}\" is not declared", prefix));
            }
            for (attr, uri) in self.atts.iter_mut().zip(resolved) {
                attr.uri = uri;
            }
            if let Some((first, second)) = self.atts.expanded_name_clash() {
                let message = format!(
                    "attributes \"{}\" and \"{}\" have the same expanded name",
                    first.qname, second.qname
                );
                return self.fatal(message);
            }
            if !self.r.config.namespace_prefixes {
                self.atts.retain(|attr| !is_namespace_decl(&attr.qname));
            }
        }

        // Content-model bookkeeping against the parent.
        if let Some(parent) = self.open.last_mut() {
            let violation =
                self.validator
                    .check_child(&self.dtd, &parent.qname, &mut parent.child_state, &qname);
            if self.r.config.validation {
                if let Some(v) = violation {
                    self.error(v)?;
                }
            }
        }

        let local = split_qname(&qname).1.to_string();
        let child_state = self
            .validator
            .open_element(element_known.map(|i| self.dtd.element_at(i)));

        self.update_locator();
        for (prefix, value) in &started_prefixes {
            if let Some(h) = self.r.content.as_deref_mut() {
                h.start_prefix_mapping(prefix, value)?;
            }
        }
        if let Some(h) = self.r.content.as_deref_mut() {
            h.start_element(uri.as_deref(), &local, &qname, &self.atts)?;
        }

        if empty {
            if self.r.config.validation {
                if let Some(v) = self.validator.check_end(&self.dtd, &qname, child_state) {
                    self.error(v)?;
                }
            }
            if let Some(h) = self.r.content.as_deref_mut() {
                h.end_element(uri.as_deref(), &local, &qname)?;
            }
            if self.r.config.namespaces {
                let undeclared = self.ns.pop_context();
                for (prefix, _) in undeclared.iter().rev() {
                    if let Some(h) = self.r.content.as_deref_mut() {
                        h.end_prefix_mapping(prefix)?;
                    }
                }
            }
        } else {
            self.open.push(OpenElement {
                qname,
                local,
                uri,
                frame_id,
                child_state,
            });
        }
        Ok(())
    }

    fn parse_end_tag(&mut self) -> Result<()> {
        self.expect('<')?;
        self.expect('/')?;
        let qname = self.read_name()?;
        self.skip_space()?;
        self.expect('>')?;

        let top = match self.open.pop() {
            Some(top) => top,
            None => return self.fatal(format!("unexpected end-tag \"</{}>\"", qname)),
        };
        if top.qname != qname {
            return self.fatal(format!(
                "end-tag \"</{}>\" does not match \"<{}>\"",
                qname, top.qname
            ));
        }
        if top.frame_id != self.em.current_id() {
            return self.fatal(format!(
                "element \"{}\" must start and end in the same entity",
                qname
            ));
        }
        if self.r.config.validation {
            if let Some(v) = self.validator.check_end(&self.dtd, &top.qname, top.child_state) {
                self.error(v)?;
            }
        }

        self.update_locator();
        if let Some(h) = self.r.content.as_deref_mut() {
            h.end_element(top.uri.as_deref(), &top.local, &top.qname)?;
        }
        if self.r.config.namespaces {
            let undeclared = self.ns.pop_context();
            for (prefix, _) in undeclared.iter().rev() {
                if let Some(h) = self.r.content.as_deref_mut() {
                    h.end_prefix_mapping(prefix)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Comments, PIs, CDATA

    /// Body of a comment; `<!--` was consumed.
    pub(crate) fn parse_comment(&mut self) -> Result<()> {
        let mut text = String::new();
        loop {
            match self.advance()? {
                None => return self.fatal("unterminated comment".to_string()),
                Some('-') if self.peek0()? == Some('-') => {
                    self.advance()?;
                    match self.advance()? {
                        Some('>') => break,
                        _ => {
                            return self.fatal(
                                "\"--\" is not allowed inside a comment".to_string(),
                            )
                        }
                    }
                }
                Some(c) if !self.facet.is_char(c) => {
                    return self.fatal(format!(
                        "character U+{:04X} is not allowed in a comment",
                        c as u32
                    ))
                }
                Some(c) => text.push(c),
            }
        }
        self.update_locator();
        if let Some(h) = self.r.lexical.as_deref_mut() {
            h.comment(&text)?;
        }
        Ok(())
    }

    /// Body of a processing instruction; `<?` was consumed.
    pub(crate) fn parse_pi(&mut self) -> Result<()> {
        let target = self.read_name()?;
        if target.eq_ignore_ascii_case("xml") {
            return self.fatal("processing instruction target \"xml\" is reserved".to_string());
        }
        let mut data = String::new();
        if !self.try_match("?>")? {
            if self.skip_space()? == 0 {
                return self.fatal(format!(
                    "expected whitespace after PI target \"{}\"",
                    target
                ));
            }
            loop {
                if self.try_match("?>")? {
                    break;
                }
                match self.advance()? {
                    None => return self.fatal("unterminated processing instruction".to_string()),
                    Some(c) if !self.facet.is_char(c) => {
                        return self.fatal(format!(
                            "character U+{:04X} is not allowed in a processing instruction",
                            c as u32
                        ))
                    }
                    Some(c) => data.push(c),
                }
            }
        }
        self.update_locator();
        if let Some(h) = self.r.content.as_deref_mut() {
            h.processing_instruction(&target, &data)?;
        }
        Ok(())
    }

    /// Body of a CDATA section; `<![CDATA[` was consumed.
    fn parse_cdata(&mut self) -> Result<()> {
        let mut data = String::new();
        loop {
            if self.try_match("]]>")? {
                break;
            }
            match self.advance()? {
                None => return self.fatal("unterminated CDATA section".to_string()),
                Some(c) if !self.facet.is_char(c) => {
                    return self.fatal(format!(
                        "character U+{:04X} is not allowed in a CDATA section",
                        c as u32
                    ))
                }
                Some(c) => data.push(c),
            }
        }
        if self.r.lexical.is_some() {
            self.flush_text()?;
            self.update_locator();
            if let Some(h) = self.r.lexical.as_deref_mut() {
                h.start_cdata()?;
            }
            if !data.is_empty() {
                if let Some(h) = self.r.content.as_deref_mut() {
                    h.characters(&data)?;
                }
            }
            if let Some(h) = self.r.lexical.as_deref_mut() {
                h.end_cdata()?;
            }
        } else if !data.is_empty() {
            // CDATA is character data no matter what it holds; it never
            // reports as ignorable whitespace.
            self.text_ws_only = false;
            self.text.push_str(&data);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // References

    fn parse_content_reference(&mut self) -> Result<()> {
        self.expect('&')?;
        if self.peek0()? == Some('#') {
            let c = self.parse_char_ref()?;
            self.text.push(c);
            self.text_ws_only = false;
            return Ok(());
        }
        let name = self.read_name()?;
        self.expect(';')?;
        if let Some(c) = predefined_entity(&name) {
            self.text.push(c);
            self.text_ws_only = false;
            return Ok(());
        }
        self.expand_general_entity(&name)
    }

    fn expand_general_entity(&mut self, name: &str) -> Result<()> {
        let decl = self.dtd.general_entity(name).cloned();
        match decl {
            Some(decl) => {
                if self.r.config.validation && self.standalone && decl.external {
                    self.error(format!(
                        "entity \"{}\" is declared externally but the document is standalone",
                        name
                    ))?;
                }
                match decl.body {
                    EntityBody::Internal { text } => {
                        self.flush_text_if_lexical()?;
                        if let Some(h) = self.r.lexical.as_deref_mut() {
                            h.start_entity(name)?;
                        }
                        self.em.push_internal(name, &text, false)?;
                        Ok(())
                    }
                    EntityBody::ExternalParsed {
                        system_id,
                        public_id,
                        base_uri,
                    } => {
                        if !self.r.config.external_general_entities {
                            self.flush_text()?;
                            if let Some(h) = self.r.content.as_deref_mut() {
                                h.skipped_entity(name)?;
                            }
                            return Ok(());
                        }
                        self.flush_text_if_lexical()?;
                        if self.open_external_entity(
                            Some(name),
                            public_id,
                            system_id,
                            base_uri,
                            FrameKind::ExternalGeneral,
                        )? {
                            if let Some(h) = self.r.lexical.as_deref_mut() {
                                h.start_entity(name)?;
                            }
                        } else if let Some(h) = self.r.content.as_deref_mut() {
                            h.skipped_entity(name)?;
                        }
                        Ok(())
                    }
                    EntityBody::Unparsed { .. } => self.fatal(format!(
                        "reference to unparsed entity \"{}\"",
                        name
                    )),
                }
            }
            None => {
                if self.dtd.entity_declarations_complete(self.standalone) {
                    self.fatal(format!("entity \"{}\" is not declared", name))
                } else {
                    self.error(format!("entity \"{}\" is not declared", name))?;
                    self.flush_text()?;
                    if let Some(h) = self.r.content.as_deref_mut() {
                        h.skipped_entity(name)?;
                    }
                    Ok(())
                }
            }
        }
    }

    /// A numeric character reference; the leading `&` was consumed, `#` is
    /// next.
    pub(crate) fn parse_char_ref(&mut self) -> Result<char> {
        self.expect('#')?;
        let hex = self.try_match("x")?;
        let mut digits = String::new();
        self.em.current().scanner.take_while(
            |c| {
                if hex {
                    c.is_ascii_hexdigit()
                } else {
                    c.is_ascii_digit()
                }
            },
            &mut digits,
        )?;
        if digits.is_empty() {
            return self.fatal("empty character reference".to_string());
        }
        self.expect(';')?;
        let radix = if hex { 16 } else { 10 };
        let value = match u32::from_str_radix(&digits, radix) {
            Ok(v) => v,
            Err(_) => return self.fatal(format!("character reference out of range: {}", digits)),
        };
        match char::from_u32(value) {
            Some(c) if self.facet.is_char(c) => Ok(c),
            _ => self.fatal(format!(
                "character reference to U+{:04X} is not a legal XML character",
                value
            )),
        }
    }

    /// The end-of-entity bookkeeping shared by content and DTD parsing.
    pub(crate) fn emit_end_entity(&mut self, frame: &EntityFrame) -> Result<()> {
        let report = match frame.kind {
            FrameKind::InternalGeneral | FrameKind::ExternalGeneral => true,
            FrameKind::InternalParameter | FrameKind::ExternalParameter => {
                self.r.config.lexical_parameter_entities
            }
            _ => false,
        };
        if report {
            if !frame.kind.is_parameter() {
                self.flush_text_if_lexical()?;
            }
            let name = match frame.name.as_deref() {
                Some(name) if frame.kind.is_parameter() => format!("%{}", name),
                Some(name) => name.to_string(),
                None => return Ok(()),
            };
            if let Some(h) = self.r.lexical.as_deref_mut() {
                h.end_entity(&name)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attribute values

    /// A quoted attribute value with reference expansion and the
    /// whitespace-to-space half of normalization.
    pub(crate) fn scan_attribute_literal(&mut self) -> Result<String> {
        let quote = match self.advance()? {
            Some(c @ '"') | Some(c @ '\'') => c,
            Some(c) => {
                return self.fatal(format!("expected a quoted attribute value, found \"{}\"", c))
            }
            None => return self.fatal("expected a quoted attribute value".to_string()),
        };
        let mut out = String::new();
        loop {
            match self.advance()? {
                None => return self.fatal("unterminated attribute value".to_string()),
                Some(c) if c == quote => break,
                Some('<') => {
                    return self.fatal("\"<\" is not allowed in attribute values".to_string())
                }
                Some('&') => {
                    if self.peek0()? == Some('#') {
                        let c = self.parse_char_ref()?;
                        out.push(c);
                    } else {
                        let name = self.read_name()?;
                        self.expect(';')?;
                        let mut active = Vec::new();
                        self.resolve_attr_entity(&name, &mut out, &mut active)?;
                    }
                }
                Some('\t') | Some('\n') => out.push(' '),
                Some(c) if !self.facet.is_char(c) => {
                    return self.fatal(format!(
                        "character U+{:04X} is not allowed in an attribute value",
                        c as u32
                    ))
                }
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn resolve_attr_entity(
        &mut self,
        name: &str,
        out: &mut String,
        active: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(c) = predefined_entity(name) {
            out.push(c);
            return Ok(());
        }
        if active.iter().any(|n| n == name) {
            let mut chain = active.clone();
            chain.push(name.to_string());
            return self.fatal(format!(
                "entity \"{}\" references itself: {}",
                name,
                chain.join(" -> ")
            ));
        }
        if active.len() >= MAX_ENTITY_DEPTH {
            return self.fatal(format!(
                "entity expansion deeper than {} levels in attribute value",
                MAX_ENTITY_DEPTH
            ));
        }
        let decl = self.dtd.general_entity(name).cloned();
        match decl {
            Some(decl) => match decl.body {
                EntityBody::Internal { text } => {
                    active.push(name.to_string());
                    self.expand_attr_text(&text, out, active)?;
                    active.pop();
                    Ok(())
                }
                EntityBody::ExternalParsed { .. } => self.fatal(format!(
                    "external entity \"{}\" is not allowed in an attribute value",
                    name
                )),
                EntityBody::Unparsed { .. } => self.fatal(format!(
                    "reference to unparsed entity \"{}\"",
                    name
                )),
            },
            None => {
                if self.dtd.entity_declarations_complete(self.standalone) {
                    self.fatal(format!("entity \"{}\" is not declared", name))
                } else {
                    self.error(format!("entity \"{}\" is not declared", name))
                }
            }
        }
    }

    /// Replacement text of an internal entity, re-scanned inside an
    /// attribute-value literal.
    fn expand_attr_text(
        &mut self,
        text: &str,
        out: &mut String,
        active: &mut Vec<String>,
    ) -> Result<()> {
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '<' => {
                    return self.fatal(
                        "entity replacement text brings \"<\" into an attribute value"
                            .to_string(),
                    )
                }
                '&' => {
                    if chars.peek() == Some(&'#') {
                        chars.next();
                        let hex = chars.peek() == Some(&'x');
                        if hex {
                            chars.next();
                        }
                        let mut digits = String::new();
                        while let Some(&d) = chars.peek() {
                            if (hex && d.is_ascii_hexdigit()) || (!hex && d.is_ascii_digit()) {
                                digits.push(d);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if chars.next() != Some(';') || digits.is_empty() {
                            return self
                                .fatal("malformed character reference in entity".to_string());
                        }
                        let radix = if hex { 16 } else { 10 };
                        let value = u32::from_str_radix(&digits, radix).ok();
                        match value.and_then(char::from_u32) {
                            Some(c) if self.facet.is_char(c) => out.push(c),
                            _ => {
                                return self.fatal(
                                    "character reference to an illegal character".to_string(),
                                )
                            }
                        }
                    } else {
                        let mut name = String::new();
                        while let Some(&d) = chars.peek() {
                            if d == ';' {
                                break;
                            }
                            name.push(d);
                            chars.next();
                        }
                        if chars.next() != Some(';') || !self.facet.is_name(&name) {
                            return self.fatal("malformed entity reference".to_string());
                        }
                        self.resolve_attr_entity(&name, out, active)?;
                    }
                }
                '\t' | '\n' => out.push(' '),
                c => out.push(c),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // External entities

    /// Resolves and opens an external entity, pushing its frame and
    /// handling the text declaration. Returns `false` (after a report)
    /// when the entity cannot be opened.
    pub(crate) fn open_external_entity(
        &mut self,
        name: Option<&str>,
        public_id: Option<String>,
        system_id: String,
        base_uri: String,
        kind: FrameKind,
    ) -> Result<bool> {
        let resolved = if self.r.config.resolve_dtd_uris {
            resolve_uri(&base_uri, &system_id)
        } else {
            system_id.clone()
        };

        let mut input: Option<EntityInput<'static>> = None;
        if let Some(r) = self.r.resolver.as_deref_mut() {
            input = r.resolve_entity(public_id.as_deref(), &resolved)?;
        }
        let input = match input {
            Some(input) => input,
            None => {
                #[cfg(feature = "catalog")]
                let target = self
                    .r
                    .catalogs
                    .as_ref()
                    .and_then(|c| c.resolve_external(public_id.as_deref(), &resolved))
                    .unwrap_or_else(|| resolved.clone());
                #[cfg(not(feature = "catalog"))]
                let target = resolved.clone();

                match open_system_id(&target) {
                    Ok(input) => match public_id {
                        Some(p) => input.with_public_id(p),
                        None => input,
                    },
                    Err(e) => {
                        let message = format!(
                            "cannot open external entity \"{}\": {}",
                            target, e
                        );
                        if kind.is_parameter() {
                            self.warning(message)?;
                        } else {
                            self.error(message)?;
                        }
                        return Ok(false);
                    }
                }
            }
        };
        self.em.push_external(name, input, kind)?;
        self.parse_text_decl()?;
        Ok(true)
    }
}

/// The five always-predefined entities.
pub(crate) fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}
