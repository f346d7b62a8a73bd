//! Shared event-trace plumbing for the integration tests.
//!
//! Handlers are registered as distinct `&mut` borrows, so interfaces that
//! should feed one trace share a [`Log`] handle instead of one object.

use std::cell::RefCell;
use std::rc::Rc;

use qxml::{
    AttributeSet, ContentHandler, DocumentLocator, DtdHandler, ErrorHandler, LexicalHandler,
    ParseError, Result,
};

/// A shared, appendable list of event descriptions.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Log::default()
    }

    pub fn push(&self, event: String) {
        self.0.borrow_mut().push(event);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Records every callback as one line in the shared log.
pub struct Recorder {
    pub log: Log,
}

impl Recorder {
    pub fn new(log: &Log) -> Self {
        Recorder { log: log.clone() }
    }
}

fn show(opt: Option<&str>) -> String {
    opt.unwrap_or("").to_string()
}

fn show_atts(atts: &AttributeSet) -> String {
    let mut out = String::new();
    for a in atts.iter() {
        out.push_str(&format!(
            " {}={}|uri={}|type={}{}",
            a.qname,
            a.value,
            a.uri.as_deref().unwrap_or(""),
            a.type_name,
            if a.specified { "" } else { "|default" },
        ));
    }
    out
}

impl ContentHandler for Recorder {
    fn set_document_locator(&mut self, _locator: DocumentLocator) {
        self.log.push("setDocumentLocator".to_string());
    }

    fn start_document(&mut self) -> Result<()> {
        self.log.push("startDocument".to_string());
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.log.push("endDocument".to_string());
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.log
            .push(format!("startPrefixMapping({},{})", prefix, uri));
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.log.push(format!("endPrefixMapping({})", prefix));
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: Option<&str>,
        local_name: &str,
        qname: &str,
        attributes: &AttributeSet,
    ) -> Result<()> {
        self.log.push(format!(
            "startElement({},{},{}{})",
            show(uri),
            local_name,
            qname,
            show_atts(attributes)
        ));
        Ok(())
    }

    fn end_element(&mut self, uri: Option<&str>, local_name: &str, qname: &str) -> Result<()> {
        self.log.push(format!(
            "endElement({},{},{})",
            show(uri),
            local_name,
            qname
        ));
        Ok(())
    }

    fn characters(&mut self, data: &str) -> Result<()> {
        self.log.push(format!("characters({})", data));
        Ok(())
    }

    fn ignorable_whitespace(&mut self, data: &str) -> Result<()> {
        self.log
            .push(format!("ignorableWhitespace({})", data.escape_debug()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.log.push(format!("pi({},{})", target, data));
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.log.push(format!("skippedEntity({})", name));
        Ok(())
    }
}

impl LexicalHandler for Recorder {
    fn start_dtd(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.log.push(format!(
            "startDTD({},{},{})",
            name,
            show(public_id),
            show(system_id)
        ));
        Ok(())
    }

    fn end_dtd(&mut self) -> Result<()> {
        self.log.push("endDTD".to_string());
        Ok(())
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.log.push(format!("startEntity({})", name));
        Ok(())
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.log.push(format!("endEntity({})", name));
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.log.push("startCDATA".to_string());
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.log.push("endCDATA".to_string());
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.log.push(format!("comment({})", text));
        Ok(())
    }
}

impl ErrorHandler for Recorder {
    fn warning(&mut self, error: &ParseError) -> Result<()> {
        self.log.push(format!("warning({})", error.message));
        Ok(())
    }

    fn error(&mut self, error: &ParseError) -> Result<()> {
        self.log.push(format!("error({})", error.message));
        Ok(())
    }

    fn fatal_error(&mut self, error: &ParseError) -> Result<()> {
        self.log.push(format!("fatalError({})", error.message));
        Ok(())
    }
}

impl DtdHandler for Recorder {
    fn notation_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<()> {
        self.log.push(format!(
            "notationDecl({},{},{})",
            name,
            show(public_id),
            show(system_id)
        ));
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: &str,
        notation_name: &str,
    ) -> Result<()> {
        self.log.push(format!(
            "unparsedEntityDecl({},{},{},{})",
            name,
            show(public_id),
            system_id,
            notation_name
        ));
        Ok(())
    }
}
