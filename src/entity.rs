//! The entity manager: a stack of active entities feeding the parser.
//!
//! The bottom frame is always the document entity. Expanding a general or
//! parameter entity pushes a frame whose scanner reads the replacement text
//! (internal entities) or a freshly opened byte stream (external entities);
//! end of a frame pops back to the reference position in the parent. The
//! manager enforces the structural rules that keep expansion sane: no
//! entity may be active twice at once, and nesting is capped.

use std::sync::Arc;

use crate::encoding::{ConverterRegistry, DecodePolicies};
use crate::errors::{Error, Location, ParseError, Result, Severity};
use crate::input::EntityInput;
use crate::scanner::Scanner;

/// Nesting cap for entity expansion, independent of the identity-based
/// recursion check. Hitting it is fatal.
pub const MAX_ENTITY_DEPTH: usize = 32;

/// What kind of entity a frame reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Document,
    InternalGeneral,
    ExternalGeneral,
    InternalParameter,
    ExternalParameter,
    /// The external DTD subset. Behaves like an external parameter entity
    /// but is not referenced by name.
    ExternalSubset,
}

impl FrameKind {
    pub fn is_parameter(self) -> bool {
        matches!(
            self,
            FrameKind::InternalParameter | FrameKind::ExternalParameter | FrameKind::ExternalSubset
        )
    }

    pub fn is_external(self) -> bool {
        matches!(
            self,
            FrameKind::Document
                | FrameKind::ExternalGeneral
                | FrameKind::ExternalParameter
                | FrameKind::ExternalSubset
        )
    }
}

/// One active entity.
pub struct EntityFrame<'i> {
    /// Entity name; `None` for the document and the external subset.
    pub name: Option<String>,
    pub kind: FrameKind,
    pub scanner: Scanner<'i>,
    pub system_id: String,
    pub public_id: Option<String>,
    pub base_uri: String,
    /// Where in the parent the reference that opened this frame sits.
    pub opened_at: Option<Location>,
    /// Frame identity; survives name reuse across sequential expansions.
    pub id: u64,
}

impl<'i> EntityFrame<'i> {
    /// The current position inside this frame.
    pub fn location(&self) -> Location {
        let (line, column) = self.scanner.position();
        Location {
            system_id: self.system_id.clone(),
            public_id: self.public_id.clone(),
            line,
            column,
        }
    }
}

/// The stack of active entities.
pub struct EntityManager<'i> {
    frames: Vec<EntityFrame<'i>>,
    next_id: u64,
    registry: Arc<ConverterRegistry>,
    policies: DecodePolicies,
    read_limit: usize,
}

impl<'i> EntityManager<'i> {
    pub fn new(
        registry: Arc<ConverterRegistry>,
        policies: DecodePolicies,
        read_limit: usize,
    ) -> Self {
        EntityManager {
            frames: Vec::new(),
            next_id: 0,
            registry,
            policies,
            read_limit,
        }
    }

    /// Opens the document entity. Must be the first push.
    pub fn push_document(&mut self, input: EntityInput<'i>) -> Result<()> {
        debug_assert!(self.frames.is_empty());
        let system_id = input.system_id().to_string();
        let public_id = input.public_id().map(str::to_string);
        let base_uri = input.base_uri().to_string();
        let hint = input.encoding_hint().map(str::to_string);
        let scanner = Scanner::from_input(
            input.kind,
            hint.as_deref(),
            &self.registry,
            self.policies,
            self.read_limit,
        )?;
        log::trace!("document entity opened: {}", system_id);
        let id = self.bump_id();
        self.frames.push(EntityFrame {
            name: None,
            kind: FrameKind::Document,
            scanner,
            system_id,
            public_id,
            base_uri,
            opened_at: None,
            id,
        });
        Ok(())
    }

    /// Expands an internal entity in place.
    pub fn push_internal(&mut self, name: &str, text: &str, parameter: bool) -> Result<()> {
        self.check_expandable(name, parameter)?;
        let parent = self.current();
        let opened_at = parent.location();
        let system_id = parent.system_id.clone();
        let public_id = parent.public_id.clone();
        let base_uri = parent.base_uri.clone();
        log::trace!("internal entity {} expanded", name);
        let id = self.bump_id();
        self.frames.push(EntityFrame {
            name: Some(name.to_string()),
            kind: if parameter {
                FrameKind::InternalParameter
            } else {
                FrameKind::InternalGeneral
            },
            scanner: Scanner::from_chars(text),
            system_id,
            public_id,
            base_uri,
            opened_at: Some(opened_at),
            id,
        });
        Ok(())
    }

    /// Opens an external parsed entity. The caller resolved `input` through
    /// the entity resolver and catalog already; the text declaration is its
    /// problem too.
    pub fn push_external(
        &mut self,
        name: Option<&str>,
        input: EntityInput<'static>,
        kind: FrameKind,
    ) -> Result<()> {
        debug_assert!(kind.is_external());
        if let Some(name) = name {
            self.check_expandable(name, kind.is_parameter())?;
        } else if self.frames.len() >= MAX_ENTITY_DEPTH {
            return Err(self.depth_error());
        }
        let system_id = input.system_id().to_string();
        let public_id = input.public_id().map(str::to_string);
        let base_uri = input.base_uri().to_string();
        let hint = input.encoding_hint().map(str::to_string);
        let scanner = Scanner::from_input(
            input.kind,
            hint.as_deref(),
            &self.registry,
            self.policies,
            self.read_limit,
        )?;
        let opened_at = self.current().location();
        log::trace!("external entity opened: {}", system_id);
        let id = self.bump_id();
        self.frames.push(EntityFrame {
            name: name.map(str::to_string),
            kind,
            scanner,
            system_id,
            public_id,
            base_uri,
            opened_at: Some(opened_at),
            id,
        });
        Ok(())
    }

    /// Pops the current frame, releasing its scanner and input. Returns the
    /// frame so the parser can emit `end_entity`. The document frame is
    /// never popped through here.
    pub fn pop(&mut self) -> Option<EntityFrame<'i>> {
        if self.frames.len() <= 1 {
            return None;
        }
        let frame = self.frames.pop();
        if let Some(frame) = &frame {
            log::trace!(
                "entity {} closed",
                frame.name.as_deref().unwrap_or(&frame.system_id)
            );
        }
        frame
    }

    /// Drops every frame above the document, in reverse push order. Used on
    /// cancellation and after fatal errors.
    pub fn unwind(&mut self) {
        while self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Identity of the currently active frame.
    pub fn current_id(&self) -> u64 {
        self.frames.last().map(|f| f.id).unwrap_or(0)
    }

    pub fn current(&mut self) -> &mut EntityFrame<'i> {
        self.frames.last_mut().expect("entity stack is empty")
    }

    pub fn current_ref(&self) -> &EntityFrame<'i> {
        self.frames.last().expect("entity stack is empty")
    }

    /// The current position, for the locator and error reports.
    pub fn location(&self) -> Location {
        self.frames
            .last()
            .map(|f| f.location())
            .unwrap_or_else(Location::unknown)
    }

    /// Reference positions of every enclosing entity, innermost first —
    /// the chain an error report prints under the primary location.
    pub fn position_trace(&self) -> Vec<Location> {
        self.frames
            .iter()
            .rev()
            .filter_map(|f| f.opened_at.clone())
            .collect()
    }

    /// Names of the entities active right now, outermost first. Used to
    /// describe recursion chains.
    pub fn active_chain(&self) -> Vec<&str> {
        self.frames
            .iter()
            .filter_map(|f| f.name.as_deref())
            .collect()
    }

    /// Whether the current frame is a parameter entity or the external
    /// subset; declarations read here count as externally declared.
    pub fn in_external_dtd(&self) -> bool {
        self.frames
            .last()
            .map(|f| matches!(f.kind, FrameKind::ExternalParameter | FrameKind::ExternalSubset))
            .unwrap_or(false)
    }

    fn check_expandable(&self, name: &str, parameter: bool) -> Result<()> {
        if self.frames.len() >= MAX_ENTITY_DEPTH {
            return Err(self.depth_error());
        }
        let already_active = self.frames.iter().any(|f| {
            f.kind.is_parameter() == parameter && f.name.as_deref() == Some(name)
        });
        if already_active {
            let mut chain: Vec<String> =
                self.active_chain().iter().map(|s| s.to_string()).collect();
            chain.push(name.to_string());
            let mut err = ParseError::new(
                Severity::Fatal,
                format!("entity \"{}\" references itself: {}", name, chain.join(" -> ")),
                self.location(),
            );
            err.trace = self.position_trace();
            return Err(Error::Parse(Box::new(err)));
        }
        Ok(())
    }

    fn depth_error(&self) -> Error {
        let mut err = ParseError::new(
            Severity::Fatal,
            format!(
                "entity expansion deeper than {} levels: {}",
                MAX_ENTITY_DEPTH,
                self.active_chain().join(" -> ")
            ),
            self.location(),
        );
        err.trace = self.position_trace();
        Error::Parse(Box::new(err))
    }

    fn bump_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
