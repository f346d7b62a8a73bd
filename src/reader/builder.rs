//! Builder for configuring a new reader.

use std::sync::Arc;

#[cfg(feature = "catalog")]
use crate::catalog::Catalogs;
use crate::encoding::{ConverterRegistry, DecodePolicies};
use crate::reader::XmlReader;
use crate::scanner::DEFAULT_READ_LIMIT;

/// The typed configuration behind the SAX feature strings. Internal
/// decisions read these fields, never the names.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub(crate) validation: bool,
    pub(crate) namespaces: bool,
    pub(crate) namespace_prefixes: bool,
    pub(crate) external_general_entities: bool,
    pub(crate) external_parameter_entities: bool,
    pub(crate) lexical_parameter_entities: bool,
    pub(crate) resolve_dtd_uris: bool,
    pub(crate) read_limit: usize,
    pub(crate) policies: DecodePolicies,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            validation: false,
            namespaces: true,
            namespace_prefixes: false,
            external_general_entities: true,
            external_parameter_entities: true,
            lexical_parameter_entities: false,
            resolve_dtd_uris: true,
            read_limit: DEFAULT_READ_LIMIT,
            policies: DecodePolicies::default(),
        }
    }
}

/// Getters, delegated to by the reader.
impl ParserConfig {
    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn namespaces(&self) -> bool {
        self.namespaces
    }

    pub fn namespace_prefixes(&self) -> bool {
        self.namespace_prefixes
    }

    pub fn external_general_entities(&self) -> bool {
        self.external_general_entities
    }

    pub fn external_parameter_entities(&self) -> bool {
        self.external_parameter_entities
    }

    pub fn lexical_parameter_entities(&self) -> bool {
        self.lexical_parameter_entities
    }

    pub fn resolve_dtd_uris(&self) -> bool {
        self.resolve_dtd_uris
    }
}

/// Builder for configuring a new [`XmlReader`].
///
/// ```
/// use qxml::XmlReader;
///
/// let reader = XmlReader::builder()
///     .validation(true)
///     .namespace_prefixes(true)
///     .build();
/// assert!(reader.validation());
/// ```
pub struct ReaderBuilder {
    config: ParserConfig,
    #[cfg(feature = "catalog")]
    catalogs: Option<Arc<Catalogs>>,
    registry: Option<Arc<ConverterRegistry>>,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderBuilder {
    pub fn new() -> Self {
        ReaderBuilder {
            config: ParserConfig::default(),
            #[cfg(feature = "catalog")]
            catalogs: None,
            registry: None,
        }
    }

    /// Changes whether DTD validity constraints are checked and reported
    /// through the error handler.
    ///
    /// (`false` by default)
    pub fn validation(mut self, val: bool) -> Self {
        self.config.validation = val;
        self
    }

    /// Changes whether namespace processing is performed: prefix bindings
    /// tracked, names resolved, expanded-name uniqueness enforced.
    ///
    /// (`true` by default; fixed once the first parse begins)
    pub fn namespaces(mut self, val: bool) -> Self {
        self.config.namespaces = val;
        self
    }

    /// Changes whether `xmlns` and `xmlns:*` attributes show up in the
    /// attribute sets handed to `start_element`.
    ///
    /// (`false` by default)
    pub fn namespace_prefixes(mut self, val: bool) -> Self {
        self.config.namespace_prefixes = val;
        self
    }

    /// Changes whether external general entities are opened and parsed.
    /// When disabled, references to them are reported via `skipped_entity`.
    ///
    /// (`true` by default)
    pub fn external_general_entities(mut self, val: bool) -> Self {
        self.config.external_general_entities = val;
        self
    }

    /// Changes whether external parameter entities, including the external
    /// DTD subset, are opened and parsed.
    ///
    /// (`true` by default)
    pub fn external_parameter_entities(mut self, val: bool) -> Self {
        self.config.external_parameter_entities = val;
        self
    }

    /// Changes whether parameter entity expansion boundaries are reported
    /// to the lexical handler.
    ///
    /// (`false` by default)
    pub fn lexical_parameter_entities(mut self, val: bool) -> Self {
        self.config.lexical_parameter_entities = val;
        self
    }

    /// Changes whether system identifiers are made absolute against the
    /// entity's base URI before being reported and opened.
    ///
    /// (`true` by default)
    pub fn resolve_dtd_uris(mut self, val: bool) -> Self {
        self.config.resolve_dtd_uris = val;
        self
    }

    /// Sets the read-ahead limit in characters for the scanner's bounded
    /// backtracking.
    ///
    /// (1024 by default)
    pub fn read_limit(mut self, chars: usize) -> Self {
        self.config.read_limit = chars;
        self
    }

    /// Sets the decoder error policies for malformed and unmappable input.
    ///
    /// (fail on both by default)
    pub fn decode_policies(mut self, policies: DecodePolicies) -> Self {
        self.config.policies = policies;
        self
    }

    /// Configures OASIS catalog resolution.
    #[cfg(feature = "catalog")]
    pub fn catalogs(mut self, catalogs: Arc<Catalogs>) -> Self {
        self.catalogs = Some(catalogs);
        self
    }

    /// Uses a custom converter registry instead of the built-in default.
    pub fn converters(mut self, registry: Arc<ConverterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds a reader with this configuration and no handlers registered.
    pub fn build<'h>(self) -> XmlReader<'h> {
        XmlReader {
            config: self.config,
            content: None,
            dtd_handler: None,
            lexical: None,
            decl: None,
            error: None,
            resolver: None,
            #[cfg(feature = "catalog")]
            catalogs: self.catalogs,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ConverterRegistry::with_defaults())),
            started: false,
            standalone: false,
        }
    }
}
