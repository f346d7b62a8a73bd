//! DOCTYPE parsing: the internal and external subsets, markup
//! declarations, conditional sections and parameter entities.
//!
//! Parameter entities ride the same entity stack as everything else: a
//! reference pushes a frame, end of replacement text pops it. In the
//! internal subset references are recognized only between declarations; in
//! the external subset the space-skipping helper expands them wherever
//! whitespace may appear, which is where the grammar lets them act.

use crate::dtd::validator::Validator;
use crate::dtd::{
    normalize_public_id, AttributeDecl, AttributeType, ContentModel, ContentSpec, DefaultDecl,
    Dfa, EntityBody, EntityDecl, ExternalId, NotationDecl,
};
use crate::entity::FrameKind;
use crate::errors::Result;
use crate::input::resolve_uri;
use crate::reader::parser::ParseSession;

impl<'r, 'h, 'i> ParseSession<'r, 'h, 'i> {
    /// Parses a DOCTYPE declaration; `<!DOCTYPE` is next in the stream.
    pub(crate) fn parse_doctype(&mut self) -> Result<()> {
        let matched = self.try_match("<!DOCTYPE")?;
        debug_assert!(matched);
        self.require_space()?;
        let root = self.read_name()?;
        self.dtd.root_name = Some(root.clone());

        let had_space = self.skip_space()? > 0;
        let external = if had_space {
            self.parse_external_id_opt(true)?
        } else {
            None
        };
        if let Some((public_id, Some(system_id))) = external.clone() {
            self.dtd.external_id = Some(ExternalId {
                system_id,
                public_id,
            });
        }

        self.update_locator();
        if let Some(h) = self.r.lexical.as_deref_mut() {
            let external_id = self.dtd.external_id.clone();
            h.start_dtd(
                &root,
                external_id.as_ref().and_then(|e| e.public_id.as_deref()),
                external_id.as_ref().map(|e| e.system_id.as_str()),
            )?;
        }

        self.skip_space()?;
        if self.try_match("[")? {
            self.parse_internal_subset()?;
        }
        self.skip_space()?;
        self.expect('>')?;

        if let Some(external_id) = self.dtd.external_id.clone() {
            if self.r.config.external_parameter_entities || self.r.config.validation {
                let base = self.em.current_ref().base_uri.clone();
                if self.open_external_entity(
                    None,
                    external_id.public_id.clone(),
                    external_id.system_id.clone(),
                    base,
                    FrameKind::ExternalSubset,
                )? {
                    self.dtd.loaded_external_subset = true;
                    self.parse_external_subset()?;
                }
            } else if let Some(h) = self.r.content.as_deref_mut() {
                h.skipped_entity("[dtd]")?;
            }
        }

        if let Some(h) = self.r.lexical.as_deref_mut() {
            h.end_dtd()?;
        }

        if self.r.config.validation {
            let pending = std::mem::take(&mut self.pending_notation_refs);
            for (owner, notation) in pending {
                if self.dtd.notation(&notation).is_none() {
                    self.error(format!(
                        "notation \"{}\" referenced by \"{}\" is not declared",
                        notation, owner
                    ))?;
                }
            }
        }
        Ok(())
    }

    fn parse_internal_subset(&mut self) -> Result<()> {
        let base_depth = self.em.depth();
        loop {
            self.subset_space()?;
            match self.peek0()? {
                Some(']') => {
                    if self.em.depth() != base_depth {
                        return self.fatal(
                            "\"]\" inside a parameter entity cannot close the internal subset"
                                .to_string(),
                        );
                    }
                    self.advance()?;
                    return Ok(());
                }
                Some('<') => self.parse_markup_decl(false)?,
                Some(c) => {
                    return self.fatal(format!(
                        "unexpected \"{}\" in the internal DTD subset",
                        c
                    ))
                }
                None => {
                    return self.fatal("unterminated internal DTD subset".to_string());
                }
            }
        }
    }

    /// Parses the external subset after its frame was pushed; pops the
    /// frame on completion.
    fn parse_external_subset(&mut self) -> Result<()> {
        let base_depth = self.em.depth();
        let was_external = self.dtd_external;
        self.dtd_external = true;
        let result = self.parse_external_subset_body(base_depth);
        self.dtd_external = was_external;
        // The subset frame itself, unless an error already unwound it.
        if result.is_ok() && self.em.depth() >= base_depth {
            while self.em.depth() > base_depth {
                self.em.pop();
            }
            self.em.pop();
        }
        result
    }

    fn parse_external_subset_body(&mut self, base_depth: usize) -> Result<()> {
        let mut include_depth = 0usize;
        loop {
            self.subset_space()?;
            match self.peek0()? {
                None => {
                    if self.em.depth() > base_depth {
                        // subset_space pops parameter entities; anything
                        // else left open here is a structural problem.
                        return self.fatal(
                            "unexpected end of entity in the external subset".to_string(),
                        );
                    }
                    if include_depth > 0 {
                        return self.fatal("unterminated conditional section".to_string());
                    }
                    return Ok(());
                }
                Some(']') => {
                    if self.try_match("]]>")? {
                        if include_depth == 0 {
                            return self.fatal("\"]]>\" outside a conditional section".to_string());
                        }
                        include_depth -= 1;
                    } else {
                        return self.fatal("stray \"]\" in the external subset".to_string());
                    }
                }
                Some('<') => {
                    if self.try_match("<![")? {
                        if self.parse_conditional_start()? {
                            include_depth += 1;
                        }
                    } else {
                        self.parse_markup_decl(true)?;
                    }
                }
                Some(c) => {
                    return self.fatal(format!("unexpected \"{}\" in the external subset", c))
                }
            }
        }
    }

    /// `<![` was consumed. Returns `true` for an INCLUDE section that the
    /// caller keeps parsing, `false` when an IGNORE section was skipped.
    fn parse_conditional_start(&mut self) -> Result<bool> {
        self.decl_space()?;
        let keyword = self.read_name()?;
        self.decl_space()?;
        self.expect('[')?;
        match keyword.as_str() {
            "INCLUDE" => Ok(true),
            "IGNORE" => {
                self.skip_ignore_section()?;
                Ok(false)
            }
            other => self.fatal(format!(
                "conditional section keyword must be INCLUDE or IGNORE, found \"{}\"",
                other
            )),
        }
    }

    /// The body of an IGNORE section: everything up to the matching `]]>`,
    /// honoring nested `<![`.
    fn skip_ignore_section(&mut self) -> Result<()> {
        let mut depth = 1usize;
        loop {
            if self.try_match("<![")? {
                depth += 1;
            } else if self.try_match("]]>")? {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            } else if self.advance()?.is_none() {
                return self.fatal("unterminated IGNORE section".to_string());
            }
        }
    }

    fn parse_markup_decl(&mut self, external: bool) -> Result<()> {
        let decl_frame = self.em.current_id();
        if self.try_match("<!--")? {
            self.parse_comment()?;
        } else if self.try_match("<?")? {
            self.parse_pi()?;
        } else if self.try_match("<!ELEMENT")? {
            self.parse_element_decl()?;
        } else if self.try_match("<!ATTLIST")? {
            self.parse_attlist_decl()?;
        } else if self.try_match("<!ENTITY")? {
            self.parse_entity_decl()?;
        } else if self.try_match("<!NOTATION")? {
            self.parse_notation_decl()?;
        } else {
            return self.fatal("unrecognized markup declaration".to_string());
        }
        // VC: Proper Declaration/PE Nesting — the declaration has to end in
        // the entity it started in.
        if external && self.r.config.validation && decl_frame != self.em.current_id() {
            self.error(
                "markup declaration crosses a parameter-entity boundary".to_string(),
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // <!ELEMENT>

    fn parse_element_decl(&mut self) -> Result<()> {
        self.require_space()?;
        let name = self.read_name()?;
        self.require_space()?;
        let (model, model_text) = self.parse_content_spec()?;
        self.decl_space()?;
        self.expect('>')?;

        if !self.dtd.declare_element(&name, model) {
            if self.r.config.validation {
                self.error(format!("element \"{}\" is declared more than once", name))?;
            }
        } else if let Some(h) = self.r.decl.as_deref_mut() {
            h.element_decl(&name, &model_text)?;
        }
        Ok(())
    }

    fn parse_content_spec(&mut self) -> Result<(ContentModel, String)> {
        if self.try_match("EMPTY")? {
            return Ok((ContentModel::Empty, "EMPTY".to_string()));
        }
        if self.try_match("ANY")? {
            return Ok((ContentModel::Any, "ANY".to_string()));
        }
        self.expect('(')?;
        self.decl_space()?;
        if self.try_match("#PCDATA")? {
            let mut names: Vec<String> = Vec::new();
            loop {
                self.decl_space()?;
                if self.try_match(")")? {
                    if names.is_empty() {
                        // (#PCDATA) may close with or without the star.
                        let _ = self.try_match("*")?;
                        return Ok((ContentModel::Mixed(names), "(#PCDATA)".to_string()));
                    }
                    if !self.try_match("*")? {
                        return self.fatal(
                            "mixed content with element names must end with \")*\"".to_string(),
                        );
                    }
                    let text = format!("(#PCDATA|{})*", names.join("|"));
                    return Ok((ContentModel::Mixed(names), text));
                }
                self.expect('|')?;
                self.decl_space()?;
                let name = self.read_name()?;
                if names.iter().any(|n| n == &name) {
                    if self.r.config.validation {
                        self.error(format!(
                            "element \"{}\" appears twice in mixed content",
                            name
                        ))?;
                    }
                } else {
                    names.push(name);
                }
            }
        }

        // Element content: the '(' is consumed, parse the group body.
        let spec = self.parse_cp_group()?;
        let spec = self.apply_modifier(spec)?;
        let text = spec.to_string();
        let model = match Dfa::compile(&spec) {
            Ok(dfa) => ContentModel::Children(dfa),
            Err(ambiguous) => {
                self.error(ambiguous.to_string())?;
                // Keep going without a usable automaton.
                ContentModel::Any
            }
        };
        Ok((model, text))
    }

    /// One `cp`: a name or a parenthesized group, plus its modifier.
    fn parse_cp(&mut self) -> Result<ContentSpec> {
        self.decl_space()?;
        let spec = if self.try_match("(")? {
            self.parse_cp_group()?
        } else {
            ContentSpec::Name(self.read_name()?)
        };
        self.apply_modifier(spec)
    }

    /// A choice or sequence body; the opening `(` is already consumed,
    /// consumes the closing `)`.
    fn parse_cp_group(&mut self) -> Result<ContentSpec> {
        let first = self.parse_cp()?;
        self.decl_space()?;
        let mut items = vec![first];
        let separator = match self.peek0()? {
            Some('|') | Some(',') => self.advance()?.expect("peeked"),
            Some(')') => {
                self.advance()?;
                // A single-item group is a sequence of one.
                return Ok(ContentSpec::Seq(items));
            }
            Some(c) => {
                return self.fatal(format!(
                    "expected \"|\", \",\" or \")\" in content model, found \"{}\"",
                    c
                ))
            }
            None => return self.fatal("unterminated content model".to_string()),
        };
        loop {
            items.push(self.parse_cp()?);
            self.decl_space()?;
            match self.peek0()? {
                Some(c) if c == separator => {
                    self.advance()?;
                }
                Some(')') => {
                    self.advance()?;
                    break;
                }
                Some(c) => {
                    return self.fatal(format!(
                        "cannot mix \"{}\" with \"{}\" in one content group",
                        c, separator
                    ))
                }
                None => return self.fatal("unterminated content model".to_string()),
            }
        }
        Ok(if separator == '|' {
            ContentSpec::Choice(items)
        } else {
            ContentSpec::Seq(items)
        })
    }

    fn apply_modifier(&mut self, spec: ContentSpec) -> Result<ContentSpec> {
        Ok(match self.peek0()? {
            Some('?') => {
                self.advance()?;
                ContentSpec::Opt(Box::new(spec))
            }
            Some('*') => {
                self.advance()?;
                ContentSpec::Star(Box::new(spec))
            }
            Some('+') => {
                self.advance()?;
                ContentSpec::Plus(Box::new(spec))
            }
            _ => spec,
        })
    }

    // ------------------------------------------------------------------
    // <!ATTLIST>

    fn parse_attlist_decl(&mut self) -> Result<()> {
        self.require_space()?;
        let element_name = self.read_name()?;
        loop {
            let had_space = self.decl_space()?;
            if self.try_match(">")? {
                return Ok(());
            }
            if !had_space {
                return self.fatal("expected whitespace in attribute-list declaration".to_string());
            }
            let attribute_name = self.read_name()?;
            self.require_space()?;
            let (ty, type_text) = self.parse_att_type(&attribute_name)?;
            self.require_space()?;
            let (default, mode, default_value) = self.parse_default_decl()?;

            let decl = AttributeDecl {
                name: attribute_name.clone(),
                ty,
                default,
                external: self.external_decl_context(),
            };
            if self.r.config.validation {
                let violations =
                    Validator::check_attribute_decl(self.dtd.element(&element_name), &decl);
                for violation in violations {
                    self.error(violation)?;
                }
            }
            if self.dtd.declare_attribute(&element_name, decl) {
                self.update_locator();
                if let Some(h) = self.r.decl.as_deref_mut() {
                    h.attribute_decl(
                        &element_name,
                        &attribute_name,
                        &type_text,
                        mode,
                        default_value.as_deref(),
                    )?;
                }
            } else {
                self.warning(format!(
                    "attribute \"{}\" of \"{}\" is already declared; the first declaration wins",
                    attribute_name, element_name
                ))?;
            }
        }
    }

    fn parse_att_type(&mut self, attribute_name: &str) -> Result<(AttributeType, String)> {
        if self.peek0()? == Some('(') {
            let tokens = self.parse_paren_tokens(false)?;
            let text = format!("({})", tokens.join("|"));
            return Ok((AttributeType::Enumeration(tokens), text));
        }
        let keyword = self.read_name()?;
        Ok(match keyword.as_str() {
            "CDATA" => (AttributeType::Cdata, "CDATA".to_string()),
            "ID" => (AttributeType::Id, "ID".to_string()),
            "IDREF" => (AttributeType::Idref, "IDREF".to_string()),
            "IDREFS" => (AttributeType::Idrefs, "IDREFS".to_string()),
            "ENTITY" => (AttributeType::Entity, "ENTITY".to_string()),
            "ENTITIES" => (AttributeType::Entities, "ENTITIES".to_string()),
            "NMTOKEN" => (AttributeType::Nmtoken, "NMTOKEN".to_string()),
            "NMTOKENS" => (AttributeType::Nmtokens, "NMTOKENS".to_string()),
            "NOTATION" => {
                self.require_space()?;
                self.expect('(')?;
                let names = self.parse_paren_tokens(true)?;
                for notation in &names {
                    self.pending_notation_refs
                        .push((attribute_name.to_string(), notation.clone()));
                }
                let text = format!("NOTATION ({})", names.join("|"));
                (AttributeType::Notation(names), text)
            }
            other => {
                return self.fatal(format!("unknown attribute type \"{}\"", other));
            }
        })
    }

    /// `(a|b|c)` token lists. `names` selects the Name production (for
    /// NOTATION) over Nmtoken (for enumerations). When called for an
    /// enumeration the `(` is still pending; for NOTATION it was consumed.
    fn parse_paren_tokens(&mut self, names: bool) -> Result<Vec<String>> {
        if !names {
            self.expect('(')?;
        }
        let mut tokens = Vec::new();
        loop {
            self.decl_space()?;
            let token = if names {
                self.read_name()?
            } else {
                self.read_nmtoken()?
            };
            if tokens.iter().any(|t| t == &token) {
                if self.r.config.validation {
                    self.error(format!("\"{}\" appears twice in the token list", token))?;
                }
            } else {
                tokens.push(token);
            }
            self.decl_space()?;
            match self.advance()? {
                Some('|') => continue,
                Some(')') => return Ok(tokens),
                Some(c) => {
                    return self.fatal(format!(
                        "expected \"|\" or \")\" in token list, found \"{}\"",
                        c
                    ))
                }
                None => return self.fatal("unterminated token list".to_string()),
            }
        }
    }

    fn parse_default_decl(&mut self) -> Result<(DefaultDecl, Option<&'static str>, Option<String>)> {
        if self.try_match("#REQUIRED")? {
            return Ok((DefaultDecl::Required, Some("#REQUIRED"), None));
        }
        if self.try_match("#IMPLIED")? {
            return Ok((DefaultDecl::Implied, Some("#IMPLIED"), None));
        }
        if self.try_match("#FIXED")? {
            self.require_space()?;
            let value = self.scan_attribute_literal()?;
            return Ok((
                DefaultDecl::Fixed(value.clone()),
                Some("#FIXED"),
                Some(value),
            ));
        }
        let value = self.scan_attribute_literal()?;
        Ok((DefaultDecl::Default(value.clone()), None, Some(value)))
    }

    // ------------------------------------------------------------------
    // <!ENTITY>

    fn parse_entity_decl(&mut self) -> Result<()> {
        self.require_space()?;
        let parameter = if self.peek0()? == Some('%') {
            self.advance()?;
            self.require_space()?;
            true
        } else {
            false
        };
        let name = self.read_name()?;
        self.require_space()?;
        let external_context = self.external_decl_context();

        let body = match self.peek0()? {
            Some('"') | Some('\'') => {
                let text = self.scan_entity_value()?;
                EntityBody::Internal { text }
            }
            _ => {
                let (public_id, system_id) = match self.parse_external_id_opt(false)? {
                    Some((public_id, Some(system_id))) => (public_id, system_id),
                    _ => {
                        return self.fatal(
                            "entity declaration needs a value or an external identifier"
                                .to_string(),
                        )
                    }
                };
                let base_uri = self.em.current_ref().base_uri.clone();
                let had_space = self.decl_space()?;
                if had_space && self.try_match("NDATA")? {
                    if parameter {
                        return self.fatal(
                            "parameter entities cannot be unparsed (NDATA)".to_string(),
                        );
                    }
                    self.require_space()?;
                    let notation = self.read_name()?;
                    self.pending_notation_refs.push((name.clone(), notation.clone()));
                    EntityBody::Unparsed {
                        system_id,
                        public_id,
                        base_uri,
                        notation,
                    }
                } else {
                    EntityBody::ExternalParsed {
                        system_id,
                        public_id,
                        base_uri,
                    }
                }
            }
        };
        self.decl_space()?;
        self.expect('>')?;

        if !parameter {
            self.check_predefined_redeclaration(&name, &body)?;
        }

        let reported_name = if parameter {
            format!("%{}", name)
        } else {
            name.clone()
        };
        let first = self.dtd.declare_entity(EntityDecl {
            name: name.clone(),
            parameter,
            body: body.clone(),
            external: external_context,
        });
        if !first {
            self.warning(format!(
                "entity \"{}\" is already declared; the first declaration wins",
                reported_name
            ))?;
            return Ok(());
        }

        self.update_locator();
        match body {
            EntityBody::Internal { text } => {
                if let Some(h) = self.r.decl.as_deref_mut() {
                    h.internal_entity_decl(&reported_name, &text)?;
                }
            }
            EntityBody::ExternalParsed {
                system_id,
                public_id,
                base_uri,
            } => {
                let reported_system = self.reported_system_id(&system_id, &base_uri);
                if let Some(h) = self.r.decl.as_deref_mut() {
                    h.external_entity_decl(&reported_name, public_id.as_deref(), &reported_system)?;
                }
            }
            EntityBody::Unparsed {
                system_id,
                public_id,
                base_uri,
                notation,
            } => {
                let reported_system = self.reported_system_id(&system_id, &base_uri);
                if let Some(h) = self.r.dtd_handler.as_deref_mut() {
                    h.unparsed_entity_decl(
                        &name,
                        public_id.as_deref(),
                        &reported_system,
                        &notation,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// The predefined entities may be redeclared, but only to their own
    /// character (directly or via a character reference that survived as
    /// the double-escaped form).
    fn check_predefined_redeclaration(
        &mut self,
        name: &str,
        body: &EntityBody,
    ) -> Result<()> {
        let expected = match crate::reader::parser::predefined_entity(name) {
            Some(c) => c,
            None => return Ok(()),
        };
        let compatible = match body {
            EntityBody::Internal { text } => {
                text.chars().eq(std::iter::once(expected))
                    || text == &format!("&#{};", expected as u32)
                    || text.eq_ignore_ascii_case(&format!("&#x{:X};", expected as u32))
            }
            _ => false,
        };
        if !compatible {
            self.error(format!(
                "entity \"{}\" is predefined and may only be redeclared as \"{}\"",
                name, expected
            ))?;
        }
        Ok(())
    }

    /// An entity value literal: character references expand now, parameter
    /// entities expand in the external subset, general entity references
    /// are carried through untouched.
    fn scan_entity_value(&mut self) -> Result<String> {
        let quote = match self.advance()? {
            Some(c @ '"') | Some(c @ '\'') => c,
            _ => return self.fatal("expected a quoted entity value".to_string()),
        };
        let mut out = String::new();
        loop {
            match self.advance()? {
                None => return self.fatal("unterminated entity value".to_string()),
                Some(c) if c == quote => break,
                Some('&') => {
                    if self.peek0()? == Some('#') {
                        let c = self.parse_char_ref()?;
                        out.push(c);
                    } else {
                        // Bypassed: kept for expansion at reference time.
                        let name = self.read_name()?;
                        self.expect(';')?;
                        out.push('&');
                        out.push_str(&name);
                        out.push(';');
                    }
                }
                Some('%') => {
                    let name = self.read_name()?;
                    self.expect(';')?;
                    if !self.dtd_external {
                        return self.fatal(
                            "parameter-entity references cannot occur inside markup \
                             declarations in the internal subset"
                                .to_string(),
                        );
                    }
                    match self.dtd.parameter_entity(&name).cloned() {
                        Some(decl) => match decl.body {
                            EntityBody::Internal { text } => out.push_str(&text),
                            _ => {
                                self.warning(format!(
                                    "external parameter entity \"%{};\" in an entity value is \
                                     not expanded",
                                    name
                                ))?;
                            }
                        },
                        None => {
                            self.error(format!("parameter entity \"%{};\" is not declared", name))?;
                        }
                    }
                }
                Some(c) if !self.facet.is_char(c) => {
                    return self.fatal(format!(
                        "character U+{:04X} is not allowed in an entity value",
                        c as u32
                    ))
                }
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // <!NOTATION>

    fn parse_notation_decl(&mut self) -> Result<()> {
        self.require_space()?;
        let name = self.read_name()?;
        self.require_space()?;
        let (public_id, system_id) = match self.parse_external_id_opt(false)? {
            Some(ids) => ids,
            None => {
                return self.fatal(
                    "notation declaration needs a SYSTEM or PUBLIC identifier".to_string(),
                )
            }
        };
        self.decl_space()?;
        self.expect('>')?;

        let first = self.dtd.declare_notation(NotationDecl {
            name: name.clone(),
            system_id: system_id.clone(),
            public_id: public_id.clone(),
        });
        if !first {
            if self.r.config.validation {
                self.error(format!("notation \"{}\" is declared more than once", name))?;
            }
            return Ok(());
        }
        let reported_system = match &system_id {
            Some(system) => {
                let base = self.em.current_ref().base_uri.clone();
                Some(self.reported_system_id(system, &base))
            }
            None => None,
        };
        self.update_locator();
        if let Some(h) = self.r.dtd_handler.as_deref_mut() {
            h.notation_decl(&name, public_id.as_deref(), reported_system.as_deref())?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared pieces

    /// `SYSTEM literal` or `PUBLIC pubid literal?`. `system_required`
    /// refuses the PUBLIC-without-system form (legal only on notations).
    /// Returns `(public_id, system_id)`.
    #[allow(clippy::type_complexity)]
    fn parse_external_id_opt(
        &mut self,
        system_required: bool,
    ) -> Result<Option<(Option<String>, Option<String>)>> {
        if self.try_match("SYSTEM")? {
            self.require_space()?;
            let system = self.read_quoted_literal()?;
            return Ok(Some((None, Some(system))));
        }
        if self.try_match("PUBLIC")? {
            self.require_space()?;
            let public = self.read_pubid_literal()?;
            let mark_space = self.skip_space()? > 0;
            let system = if mark_space
                && matches!(self.peek0()?, Some('"') | Some('\''))
            {
                Some(self.read_quoted_literal()?)
            } else {
                None
            };
            if system.is_none() && system_required {
                return self.fatal(
                    "PUBLIC external identifier needs a system literal here".to_string(),
                );
            }
            return Ok(Some((Some(public), system)));
        }
        Ok(None)
    }

    fn read_pubid_literal(&mut self) -> Result<String> {
        let literal = self.read_quoted_literal()?;
        if let Some(bad) = literal.chars().find(|&c| !self.facet.is_pubid_char(c)) {
            return self.fatal(format!(
                "character \"{}\" is not allowed in a public identifier",
                bad
            ));
        }
        Ok(normalize_public_id(&literal))
    }

    fn reported_system_id(&self, system_id: &str, base_uri: &str) -> String {
        if self.r.config.resolve_dtd_uris {
            resolve_uri(base_uri, system_id)
        } else {
            system_id.to_string()
        }
    }

    // ------------------------------------------------------------------
    // Parameter entities and DTD whitespace

    /// Whitespace between declarations. Expands parameter-entity references
    /// and pops exhausted parameter-entity frames.
    fn subset_space(&mut self) -> Result<bool> {
        self.pe_aware_space(true)
    }

    /// Whitespace inside declarations: plain in the internal subset (where
    /// the grammar forbids parameter entities there), expanding in the
    /// external subset.
    pub(crate) fn decl_space(&mut self) -> Result<bool> {
        if self.dtd_external {
            self.pe_aware_space(true)
        } else {
            Ok(self.skip_space()? > 0)
        }
    }

    pub(crate) fn require_space(&mut self) -> Result<()> {
        if !self.decl_space()? {
            return self.fatal("expected whitespace".to_string());
        }
        Ok(())
    }

    fn pe_aware_space(&mut self, expand: bool) -> Result<bool> {
        let mut any = false;
        loop {
            if self.skip_space()? > 0 {
                any = true;
            }
            match self.peek0()? {
                Some('%') if expand => {
                    let next_is_name = match self.peek_at(1)? {
                        Some(c) => self.facet.is_name_start_char(c),
                        None => false,
                    };
                    if !next_is_name {
                        return Ok(any);
                    }
                    self.advance()?;
                    let name = self.read_name()?;
                    self.expect(';')?;
                    self.expand_parameter_entity(&name)?;
                    any = true;
                }
                None => {
                    let poppable = self.em.depth() > 1
                        && matches!(
                            self.em.current_ref().kind,
                            FrameKind::InternalParameter | FrameKind::ExternalParameter
                        );
                    if !poppable {
                        return Ok(any);
                    }
                    let frame = self.em.pop().expect("depth checked");
                    self.emit_end_entity(&frame)?;
                    any = true;
                }
                _ => return Ok(any),
            }
        }
    }

    fn expand_parameter_entity(&mut self, name: &str) -> Result<()> {
        self.dtd.saw_parameter_reference = true;
        match self.dtd.parameter_entity(name).cloned() {
            Some(decl) => match decl.body {
                EntityBody::Internal { text } => {
                    if self.r.config.lexical_parameter_entities {
                        let reported = format!("%{}", name);
                        if let Some(h) = self.r.lexical.as_deref_mut() {
                            h.start_entity(&reported)?;
                        }
                    }
                    self.em.push_internal(name, &text, true)
                }
                EntityBody::ExternalParsed {
                    system_id,
                    public_id,
                    base_uri,
                } => {
                    if !self.r.config.external_parameter_entities {
                        let reported = format!("%{}", name);
                        if let Some(h) = self.r.content.as_deref_mut() {
                            h.skipped_entity(&reported)?;
                        }
                        return Ok(());
                    }
                    if self.open_external_entity(
                        Some(name),
                        public_id,
                        system_id,
                        base_uri,
                        FrameKind::ExternalParameter,
                    )? {
                        if self.r.config.lexical_parameter_entities {
                            let reported = format!("%{}", name);
                            if let Some(h) = self.r.lexical.as_deref_mut() {
                                h.start_entity(&reported)?;
                            }
                        }
                    } else {
                        let reported = format!("%{}", name);
                        if let Some(h) = self.r.content.as_deref_mut() {
                            h.skipped_entity(&reported)?;
                        }
                    }
                    Ok(())
                }
                EntityBody::Unparsed { .. } => {
                    self.fatal(format!("parameter entity \"%{};\" cannot be unparsed", name))
                }
            },
            None => {
                self.error(format!("parameter entity \"%{};\" is not declared", name))?;
                let reported = format!("%{}", name);
                if let Some(h) = self.r.content.as_deref_mut() {
                    h.skipped_entity(&reported)?;
                }
                Ok(())
            }
        }
    }
}
