//! The callback interfaces a parse reports through.
//!
//! All handlers are traits with no-op defaults, so an application implements
//! only what it cares about. Callbacks run synchronously on the parsing
//! thread; data passed by reference is valid only for the duration of the
//! callback and must be copied to be retained. Any callback may return an
//! error to abort the parse — [`Error::Cancelled`](crate::Error::Cancelled)
//! is the designated cancellation signal and surfaces unchanged out of
//! `parse`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::attr::AttributeSet;
use crate::errors::{Location, ParseError, Result};
use crate::input::EntityInput;

/// Tells the application where the parser currently stands.
///
/// The parser hands one instance to
/// [`ContentHandler::set_document_locator`] before `start_document` and
/// keeps it updated; the handler may keep the clone and query it during any
/// later callback. Outside callbacks the values are unspecified.
#[derive(Clone)]
pub struct DocumentLocator {
    inner: Rc<RefCell<Location>>,
}

impl DocumentLocator {
    pub(crate) fn new() -> Self {
        DocumentLocator {
            inner: Rc::new(RefCell::new(Location::unknown())),
        }
    }

    pub(crate) fn update(&self, location: Location) {
        *self.inner.borrow_mut() = location;
    }

    /// 1-based line of the event being reported.
    pub fn line(&self) -> u64 {
        self.inner.borrow().line
    }

    /// 1-based column of the event being reported.
    pub fn column(&self) -> u64 {
        self.inner.borrow().column
    }

    /// System identifier of the entity the event comes from.
    pub fn system_id(&self) -> String {
        self.inner.borrow().system_id.clone()
    }

    /// Public identifier of that entity, when known.
    pub fn public_id(&self) -> Option<String> {
        self.inner.borrow().public_id.clone()
    }
}

/// Receives the logical content of the document.
///
/// This is the interface most applications implement. The event order
/// mirrors the document: everything between `start_element` and the
/// matching `end_element` is that element's content, in order. An empty
/// element `<a/>` produces `start_element` immediately followed by
/// `end_element`; only a lexical handler can tell it apart from
/// `<a></a>`.
pub trait ContentHandler {
    /// Receives the locator before any other event, including
    /// `start_document`.
    #[allow(unused_variables)]
    fn set_document_locator(&mut self, locator: DocumentLocator) {}

    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    /// The last event of every parse, delivered even after a fatal error.
    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    /// A namespace binding coming into scope. Fires immediately before the
    /// `start_element` that carries the declaration.
    #[allow(unused_variables)]
    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        Ok(())
    }

    /// A namespace binding going out of scope, immediately after the
    /// matching `end_element`.
    #[allow(unused_variables)]
    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        Ok(())
    }

    /// Start of an element. `uri` is `None` for names in no namespace and
    /// when namespace processing is disabled. The attribute set is borrowed;
    /// copy what must outlive the callback.
    #[allow(unused_variables)]
    fn start_element(
        &mut self,
        uri: Option<&str>,
        local_name: &str,
        qname: &str,
        attributes: &AttributeSet,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn end_element(&mut self, uri: Option<&str>, local_name: &str, qname: &str) -> Result<()> {
        Ok(())
    }

    /// Character data. Contiguous data is coalesced where possible but may
    /// be split at buffer boundaries; never across markup.
    #[allow(unused_variables)]
    fn characters(&mut self, data: &str) -> Result<()> {
        Ok(())
    }

    /// Whitespace inside element content, reported separately when the DTD
    /// declares the enclosing element with an element-content model.
    #[allow(unused_variables)]
    fn ignorable_whitespace(&mut self, data: &str) -> Result<()> {
        Ok(())
    }

    /// A processing instruction. The XML declaration is never reported
    /// here.
    #[allow(unused_variables)]
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        Ok(())
    }

    /// An entity the parser did not expand, because external entity loading
    /// is disabled or the declaration was never seen. Parameter entities
    /// are reported with a `%` prefix.
    #[allow(unused_variables)]
    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        Ok(())
    }
}

/// Receives the DTD events every processor must report: notations and
/// unparsed entities.
pub trait DtdHandler {
    #[allow(unused_variables)]
    fn notation_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: &str,
        notation_name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Receives lexical events: comments, CDATA boundaries, DTD boundaries and
/// entity expansion boundaries. Purely informational; a document reads the
/// same without them.
pub trait LexicalHandler {
    #[allow(unused_variables)]
    fn start_dtd(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        Ok(())
    }

    /// Start of an expanded entity. Parameter entities carry a `%` prefix;
    /// they are only reported when the corresponding feature asks for them.
    #[allow(unused_variables)]
    fn start_entity(&mut self, name: &str) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn end_entity(&mut self, name: &str) -> Result<()> {
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn comment(&mut self, text: &str) -> Result<()> {
        Ok(())
    }
}

/// Receives the remaining DTD declarations, for applications that want the
/// full grammar: element and attribute declarations and parsed entities.
pub trait DeclHandler {
    /// `model` is the content model in canonical form, for example
    /// `(head,body)` or `EMPTY`.
    #[allow(unused_variables)]
    fn element_decl(&mut self, name: &str, model: &str) -> Result<()> {
        Ok(())
    }

    /// `mode` is `#IMPLIED`, `#REQUIRED`, `#FIXED` or `None` for a plain
    /// default; `value` is the default value when one exists.
    #[allow(unused_variables)]
    fn attribute_decl(
        &mut self,
        element_name: &str,
        attribute_name: &str,
        type_name: &str,
        mode: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn internal_entity_decl(&mut self, name: &str, value: &str) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn external_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Receives problem reports.
///
/// Without a registered error handler, warnings and recoverable errors are
/// dropped and fatal errors surface only as the error returned by `parse`.
/// A handler that wants to stop the parse returns an error itself.
pub trait ErrorHandler {
    /// A condition that violates no constraint of the recommendation.
    #[allow(unused_variables)]
    fn warning(&mut self, error: &ParseError) -> Result<()> {
        Ok(())
    }

    /// A validity error. The parser continues from the next safe point.
    #[allow(unused_variables)]
    fn error(&mut self, error: &ParseError) -> Result<()> {
        Ok(())
    }

    /// A well-formedness error. No further content events will follow,
    /// though more errors may, and `end_document` still will.
    #[allow(unused_variables)]
    fn fatal_error(&mut self, error: &ParseError) -> Result<()> {
        Ok(())
    }
}

/// Lets the application redirect external entities before they are opened.
///
/// Returning `Ok(None)` tells the parser to use the system identifier as
/// written (after catalog resolution, when a catalog is configured).
pub trait EntityResolver {
    #[allow(unused_variables)]
    fn resolve_entity(
        &mut self,
        public_id: Option<&str>,
        system_id: &str,
    ) -> Result<Option<EntityInput<'static>>> {
        Ok(None)
    }
}
