//! qxml — a validating, event-driven XML 1.0 parser.
//!
//! The crate reads XML the SAX way: you register handlers, call
//! [`XmlReader::parse`], and the parser walks the document calling back
//! into them. It understands DTDs (internal and external subsets,
//! defaulted and typed attributes, content-model validation), namespaces,
//! a wide range of encodings with autodetection, and OASIS XML Catalog
//! resolution for external identifiers.
//!
//! ## Reading a document
//!
//! ```
//! use qxml::{AttributeSet, ContentHandler, Result, XmlReader};
//!
//! #[derive(Default)]
//! struct TitleCollector {
//!     inside_title: bool,
//!     titles: Vec<String>,
//! }
//!
//! impl ContentHandler for TitleCollector {
//!     fn start_element(
//!         &mut self,
//!         _uri: Option<&str>,
//!         local_name: &str,
//!         _qname: &str,
//!         _attributes: &AttributeSet,
//!     ) -> Result<()> {
//!         self.inside_title = local_name == "title";
//!         Ok(())
//!     }
//!
//!     fn characters(&mut self, data: &str) -> Result<()> {
//!         if self.inside_title {
//!             self.titles.push(data.to_string());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut collector = TitleCollector::default();
//! let mut reader = XmlReader::new();
//! reader.set_content_handler(&mut collector);
//! reader.parse_str("<doc><title>One</title><title>Two</title></doc>").unwrap();
//! assert_eq!(collector.titles, ["One", "Two"]);
//! ```
//!
//! Parsing is strictly single-threaded: one parse call owns one thread and
//! all callbacks happen on it. Different parses may run concurrently on
//! different threads with their own readers; catalogs, converter
//! registries and the character tables are safe to share.
#![cfg_attr(
    feature = "document-features",
    cfg_attr(doc, doc = ::document_features::document_features!())
)]

pub mod attr;
#[cfg(feature = "catalog")]
pub mod catalog;
pub mod chartype;
pub mod dtd;
pub mod encoding;
mod errors;
pub mod handler;
pub mod input;
pub mod name;
mod reader;
pub mod scanner;

pub(crate) mod entity;

pub use crate::attr::{Attribute, AttributeSet};
#[cfg(feature = "catalog")]
pub use crate::catalog::{Catalog, CatalogEntry, Catalogs, Prefer};
pub use crate::chartype::CharTypeFacet;
pub use crate::encoding::{
    CodeConverter, ConverterRegistry, DecodePolicies, Decoder, EncodingRef, ErrorPolicy,
};
pub use crate::errors::{Error, Location, ParseError, Result, Severity};
pub use crate::handler::{
    ContentHandler, DeclHandler, DocumentLocator, DtdHandler, EntityResolver, ErrorHandler,
    LexicalHandler,
};
pub use crate::input::{ByteSource, EntityInput};
pub use crate::name::{NamespaceSupport, ResolveResult, NS_XMLNS_URI, NS_XML_URI};
pub use crate::reader::{ParserConfig, PropertyValue, ReaderBuilder, XmlReader};
