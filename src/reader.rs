//! A module to handle `XmlReader`
//!
//! The reader is the SAX surface of the crate: register handlers, flip
//! features, call [`XmlReader::parse`]. One parse call owns the calling
//! thread; every callback runs on it before `parse` returns.

mod builder;
pub(crate) mod dtdparse;
pub(crate) mod parser;

use std::sync::Arc;

use delegate::delegate;

#[cfg(feature = "catalog")]
use crate::catalog::Catalogs;
use crate::encoding::ConverterRegistry;
use crate::errors::{Error, Result};
use crate::handler::{
    ContentHandler, DeclHandler, DtdHandler, EntityResolver, ErrorHandler, LexicalHandler,
};
use crate::input::EntityInput;

pub use self::builder::{ParserConfig, ReaderBuilder};
use self::parser::ParseSession;

/// Values accepted by [`XmlReader::set_property`].
pub enum PropertyValue<'h> {
    LexicalHandler(&'h mut dyn LexicalHandler),
    DeclHandler(&'h mut dyn DeclHandler),
}

/// An event-driven XML 1.0 parser.
///
/// # Examples
///
/// ```
/// use qxml::{AttributeSet, ContentHandler, EntityInput, Result, XmlReader};
///
/// #[derive(Default)]
/// struct ElementCounter {
///     count: usize,
/// }
///
/// impl ContentHandler for ElementCounter {
///     fn start_element(
///         &mut self,
///         _uri: Option<&str>,
///         _local_name: &str,
///         _qname: &str,
///         _attributes: &AttributeSet,
///     ) -> Result<()> {
///         self.count += 1;
///         Ok(())
///     }
/// }
///
/// let mut counter = ElementCounter::default();
/// let mut reader = XmlReader::new();
/// reader.set_content_handler(&mut counter);
/// reader
///     .parse(EntityInput::from_str("inline", "<a><b/><b/></a>"))
///     .unwrap();
/// assert_eq!(counter.count, 3);
/// ```
pub struct XmlReader<'h> {
    pub(crate) config: ParserConfig,
    pub(crate) content: Option<&'h mut dyn ContentHandler>,
    pub(crate) dtd_handler: Option<&'h mut dyn DtdHandler>,
    pub(crate) lexical: Option<&'h mut dyn LexicalHandler>,
    pub(crate) decl: Option<&'h mut dyn DeclHandler>,
    pub(crate) error: Option<&'h mut dyn ErrorHandler>,
    pub(crate) resolver: Option<&'h mut dyn EntityResolver>,
    #[cfg(feature = "catalog")]
    pub(crate) catalogs: Option<Arc<Catalogs>>,
    pub(crate) registry: Arc<ConverterRegistry>,
    /// Set once the first parse begins; some features freeze then.
    pub(crate) started: bool,
    /// Value of the `standalone` pseudo-attribute of the current document,
    /// readable through the `is-standalone` feature after `start_document`.
    pub(crate) standalone: bool,
}

impl<'h> XmlReader<'h> {
    /// A reader with the default configuration: namespace processing on,
    /// validation off, external entities loaded.
    pub fn new() -> Self {
        ReaderBuilder::new().build()
    }

    /// A builder for a non-default configuration.
    pub fn builder() -> ReaderBuilder {
        ReaderBuilder::new()
    }
}

impl<'h> Default for XmlReader<'h> {
    fn default() -> Self {
        XmlReader::new()
    }
}

/// Handler registration
impl<'h> XmlReader<'h> {
    pub fn set_content_handler(&mut self, handler: &'h mut dyn ContentHandler) {
        self.content = Some(handler);
    }

    pub fn set_dtd_handler(&mut self, handler: &'h mut dyn DtdHandler) {
        self.dtd_handler = Some(handler);
    }

    pub fn set_lexical_handler(&mut self, handler: &'h mut dyn LexicalHandler) {
        self.lexical = Some(handler);
    }

    pub fn set_decl_handler(&mut self, handler: &'h mut dyn DeclHandler) {
        self.decl = Some(handler);
    }

    pub fn set_error_handler(&mut self, handler: &'h mut dyn ErrorHandler) {
        self.error = Some(handler);
    }

    pub fn set_entity_resolver(&mut self, resolver: &'h mut dyn EntityResolver) {
        self.resolver = Some(resolver);
    }

    /// Configures OASIS catalog resolution for external identifiers. The
    /// catalog set is immutable and may be shared between readers.
    #[cfg(feature = "catalog")]
    pub fn set_catalogs(&mut self, catalogs: Arc<Catalogs>) {
        self.catalogs = Some(catalogs);
    }
}

/// Getters
impl<'h> XmlReader<'h> {
    delegate! {
        to self.config {
            /// Whether DTD validity is checked and reported.
            pub fn validation(&self) -> bool;
            /// Whether namespace processing is performed.
            pub fn namespaces(&self) -> bool;
            /// Whether `xmlns` attributes are reported like ordinary ones.
            pub fn namespace_prefixes(&self) -> bool;
            /// Whether external general entities are read.
            pub fn external_general_entities(&self) -> bool;
            /// Whether external parameter entities and the external subset
            /// are read.
            pub fn external_parameter_entities(&self) -> bool;
            /// Whether parameter entity boundaries reach the lexical
            /// handler.
            pub fn lexical_parameter_entities(&self) -> bool;
            /// Whether system identifiers are made absolute before being
            /// reported and opened.
            pub fn resolve_dtd_uris(&self) -> bool;
        }
    }

    /// Whether the current document declared `standalone="yes"`. Meaningful
    /// once `start_document` has fired.
    pub fn is_standalone(&self) -> bool {
        self.standalone
    }
}

/// The SAX-compatible string-keyed configuration surface. Thin adapters
/// over the typed configuration; nothing internal is driven by name lookup.
impl<'h> XmlReader<'h> {
    /// Sets a feature flag by SAX name or its short form.
    pub fn set_feature(&mut self, name: &str, value: bool) -> Result<()> {
        match feature_key(name) {
            Some("validation") => self.config.validation = value,
            Some("namespaces") => {
                if self.started {
                    return Err(Error::ReadOnlyFeature("namespaces"));
                }
                self.config.namespaces = value;
            }
            Some("namespace-prefixes") => self.config.namespace_prefixes = value,
            Some("external-general-entities") => self.config.external_general_entities = value,
            Some("external-parameter-entities") => {
                self.config.external_parameter_entities = value
            }
            Some("lexical-handler/parameter-entities") => {
                self.config.lexical_parameter_entities = value
            }
            Some("resolve-dtd-uris") => self.config.resolve_dtd_uris = value,
            Some("is-standalone") => return Err(Error::ReadOnlyFeature("is-standalone")),
            _ => return Err(Error::UnknownFeature(name.to_string())),
        }
        Ok(())
    }

    /// Reads a feature flag by SAX name or its short form.
    pub fn get_feature(&self, name: &str) -> Result<bool> {
        match feature_key(name) {
            Some("validation") => Ok(self.config.validation),
            Some("namespaces") => Ok(self.config.namespaces),
            Some("namespace-prefixes") => Ok(self.config.namespace_prefixes),
            Some("external-general-entities") => Ok(self.config.external_general_entities),
            Some("external-parameter-entities") => Ok(self.config.external_parameter_entities),
            Some("lexical-handler/parameter-entities") => {
                Ok(self.config.lexical_parameter_entities)
            }
            Some("resolve-dtd-uris") => Ok(self.config.resolve_dtd_uris),
            Some("is-standalone") => Ok(self.standalone),
            _ => Err(Error::UnknownFeature(name.to_string())),
        }
    }

    /// Sets a property by SAX name or its short form. The lexical and
    /// declaration handlers travel through here for SAX compatibility;
    /// [`set_lexical_handler`](Self::set_lexical_handler) and
    /// [`set_decl_handler`](Self::set_decl_handler) are the direct routes.
    pub fn set_property(&mut self, name: &str, value: PropertyValue<'h>) -> Result<()> {
        match (property_key(name), value) {
            (Some("lexical-handler"), PropertyValue::LexicalHandler(h)) => {
                self.lexical = Some(h);
                Ok(())
            }
            (Some("declaration-handler"), PropertyValue::DeclHandler(h)) => {
                self.decl = Some(h);
                Ok(())
            }
            (Some("lexical-handler"), _) | (Some("declaration-handler"), _) => Err(
                Error::UnsupportedProperty("wrong value type for handler property"),
            ),
            (Some("dom-node"), _) => Err(Error::UnsupportedProperty("dom-node")),
            (Some("xml-string"), _) => Err(Error::ReadOnlyFeature("xml-string")),
            _ => Err(Error::UnknownProperty(name.to_string())),
        }
    }
}

/// Parsing
impl<'h> XmlReader<'h> {
    /// Parses one document, delivering events to the registered handlers.
    ///
    /// Returns when `end_document` has been delivered or a fatal error cut
    /// the parse short; recoverable errors alone never make this fail.
    pub fn parse<'i>(&mut self, input: EntityInput<'i>) -> Result<()> {
        self.started = true;
        self.standalone = false;
        ParseSession::run(self, input)
    }

    /// Parses a document held in a string; encoding detection is skipped.
    pub fn parse_str(&mut self, text: &str) -> Result<()> {
        self.parse(EntityInput::from_str("<string>", text))
    }

    /// Parses a document held in a byte buffer.
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.parse(EntityInput::from_bytes("<bytes>", bytes))
    }

    /// Parses the file at `path`.
    pub fn parse_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let input = EntityInput::from_file(path)?;
        self.parse(input)
    }
}

const SAX_FEATURE_PREFIX: &str = "http://xml.org/sax/features/";
const SAX_PROPERTY_PREFIX: &str = "http://xml.org/sax/properties/";

fn feature_key(name: &str) -> Option<&str> {
    let short = name.strip_prefix(SAX_FEATURE_PREFIX).unwrap_or(name);
    match short {
        "validation"
        | "namespaces"
        | "namespace-prefixes"
        | "external-general-entities"
        | "external-parameter-entities"
        | "lexical-handler/parameter-entities"
        | "resolve-dtd-uris"
        | "is-standalone" => Some(short),
        _ => None,
    }
}

fn property_key(name: &str) -> Option<&str> {
    let short = name.strip_prefix(SAX_PROPERTY_PREFIX).unwrap_or(name);
    match short {
        "lexical-handler" | "declaration-handler" | "dom-node" | "xml-string" => Some(short),
        _ => None,
    }
}
