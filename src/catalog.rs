//! OASIS XML Catalog resolution.
//!
//! Catalogs map external identifiers to local URIs. Files are parsed with
//! this crate's own reader (non-validating, no catalog — no turtles) on
//! first use and cached immutably, so a loaded catalog set is safe to share
//! between parses and threads. A catalog that fails to load is skipped with
//! a warning, never an error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::attr::AttributeSet;
use crate::dtd::normalize_public_id;
use crate::errors::Result;
use crate::handler::ContentHandler;
use crate::input::{open_system_id, resolve_uri};
use crate::reader::XmlReader;

/// Which identifier kind wins when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefer {
    Public,
    System,
}

/// One catalog entry, with every URI already made absolute against the
/// catalog's base. `group` elements are flattened at load time; a `Public`
/// entry remembers the preference that was in force around it.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    Public {
        public_id: String,
        uri: String,
        prefer_public: bool,
    },
    System {
        system_id: String,
        uri: String,
    },
    RewriteSystem {
        prefix: String,
        rewrite: String,
    },
    Uri {
        name: String,
        uri: String,
    },
    RewriteUri {
        prefix: String,
        rewrite: String,
    },
    DelegatePublic {
        prefix: String,
        catalog: String,
    },
    DelegateSystem {
        prefix: String,
        catalog: String,
    },
    DelegateUri {
        prefix: String,
        catalog: String,
    },
    NextCatalog {
        catalog: String,
    },
}

/// One parsed catalog file.
#[derive(Debug)]
pub struct Catalog {
    pub base_uri: String,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parses a catalog document from raw bytes.
    pub fn parse(base_uri: &str, bytes: &[u8]) -> Result<Catalog> {
        let mut builder = CatalogBuilder {
            base_uri: base_uri.to_string(),
            prefer_stack: vec![Prefer::Public],
            entries: Vec::new(),
        };
        let mut reader = XmlReader::new();
        reader.set_content_handler(&mut builder);
        reader.parse(crate::input::EntityInput::from_bytes(base_uri, bytes))?;
        Ok(Catalog {
            base_uri: base_uri.to_string(),
            entries: builder.entries,
        })
    }
}

struct CatalogBuilder {
    base_uri: String,
    prefer_stack: Vec<Prefer>,
    entries: Vec<CatalogEntry>,
}

impl CatalogBuilder {
    fn absolute(&self, reference: &str) -> String {
        resolve_uri(&self.base_uri, reference)
    }

    fn prefer(&self) -> Prefer {
        *self.prefer_stack.last().unwrap_or(&Prefer::Public)
    }

    fn prefer_from(&self, atts: &AttributeSet) -> Prefer {
        match atts.value_of_qname("prefer") {
            Some("system") => Prefer::System,
            Some("public") => Prefer::Public,
            _ => self.prefer(),
        }
    }
}

impl ContentHandler for CatalogBuilder {
    fn start_element(
        &mut self,
        _uri: Option<&str>,
        local_name: &str,
        _qname: &str,
        atts: &AttributeSet,
    ) -> Result<()> {
        let get = |name: &str| atts.value_of_qname(name).map(str::to_string);
        match local_name {
            "catalog" | "group" => {
                self.prefer_stack.push(self.prefer_from(atts));
            }
            "public" => {
                if let (Some(public_id), Some(uri)) = (get("publicId"), get("uri")) {
                    let prefer_public = self.prefer() == Prefer::Public;
                    self.entries.push(CatalogEntry::Public {
                        public_id: normalize_public_id(&public_id),
                        uri: self.absolute(&uri),
                        prefer_public,
                    });
                }
            }
            "system" => {
                if let (Some(system_id), Some(uri)) = (get("systemId"), get("uri")) {
                    self.entries.push(CatalogEntry::System {
                        system_id,
                        uri: self.absolute(&uri),
                    });
                }
            }
            "rewriteSystem" => {
                if let (Some(prefix), Some(rewrite)) =
                    (get("systemIdStartString"), get("rewritePrefix"))
                {
                    self.entries.push(CatalogEntry::RewriteSystem {
                        prefix,
                        rewrite: self.absolute(&rewrite),
                    });
                }
            }
            "uri" => {
                if let (Some(name), Some(uri)) = (get("name"), get("uri")) {
                    self.entries.push(CatalogEntry::Uri {
                        name,
                        uri: self.absolute(&uri),
                    });
                }
            }
            "rewriteURI" => {
                if let (Some(prefix), Some(rewrite)) =
                    (get("uriStartString"), get("rewritePrefix"))
                {
                    self.entries.push(CatalogEntry::RewriteUri {
                        prefix,
                        rewrite: self.absolute(&rewrite),
                    });
                }
            }
            "delegatePublic" => {
                if let (Some(prefix), Some(catalog)) =
                    (get("publicIdStartString"), get("catalog"))
                {
                    self.entries.push(CatalogEntry::DelegatePublic {
                        prefix: normalize_public_id(&prefix),
                        catalog: self.absolute(&catalog),
                    });
                }
            }
            "delegateSystem" => {
                if let (Some(prefix), Some(catalog)) =
                    (get("systemIdStartString"), get("catalog"))
                {
                    self.entries.push(CatalogEntry::DelegateSystem {
                        prefix,
                        catalog: self.absolute(&catalog),
                    });
                }
            }
            "delegateURI" => {
                if let (Some(prefix), Some(catalog)) = (get("uriStartString"), get("catalog")) {
                    self.entries.push(CatalogEntry::DelegateUri {
                        prefix,
                        catalog: self.absolute(&catalog),
                    });
                }
            }
            "nextCatalog" => {
                if let Some(catalog) = get("catalog") {
                    self.entries.push(CatalogEntry::NextCatalog {
                        catalog: self.absolute(&catalog),
                    });
                }
            }
            other => {
                log::warn!("ignoring unknown catalog element <{}>", other);
            }
        }
        Ok(())
    }

    fn end_element(&mut self, _uri: Option<&str>, local_name: &str, _qname: &str) -> Result<()> {
        if local_name == "catalog" || local_name == "group" {
            self.prefer_stack.pop();
        }
        Ok(())
    }
}

/// An ordered set of catalogs plus the cache of everything loaded through
/// delegation. Load once, share freely; per-parse resolution state lives on
/// the stack.
pub struct Catalogs {
    roots: Vec<String>,
    cache: Mutex<HashMap<String, Option<Arc<Catalog>>>>,
}

impl Catalogs {
    /// Builds a resolver over catalog files named by URI or path, searched
    /// in order.
    pub fn from_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Catalogs {
            roots: files.into_iter().map(Into::into).collect(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a resolver from a list of catalog files, the usual shape of
    /// a `XML_CATALOG_FILES`-style setting.
    ///
    /// Entries are separated by `;` and, on platforms whose path-list
    /// separator is `:`, by `:` as well. A colon introducing a URI scheme
    /// (`file://...`) does not separate.
    pub fn from_path_list(list: &str) -> Self {
        Self::from_files(split_path_list(list))
    }

    /// Seeds the resolver with an already parsed catalog, mainly for tests
    /// and embedded catalogs.
    pub fn from_catalog(catalog: Catalog) -> Self {
        let uri = catalog.base_uri.clone();
        let mut cache = HashMap::new();
        cache.insert(uri.clone(), Some(Arc::new(catalog)));
        Catalogs {
            roots: vec![uri],
            cache: Mutex::new(cache),
        }
    }

    /// Resolves an external identifier to a redirected system identifier.
    /// `None` means "use the original".
    pub fn resolve_external(&self, public_id: Option<&str>, system_id: &str) -> Option<String> {
        // A urn:publicid: in system-id position is really a public id.
        let unwrapped_system = unwrap_publicid_urn(system_id);
        let public_owned = public_id
            .map(|p| unwrap_publicid_urn(p).unwrap_or_else(|| normalize_public_id(p)))
            .or_else(|| unwrapped_system.clone());
        let system = if unwrapped_system.is_some() {
            None
        } else {
            Some(system_id)
        };

        let mut visited = HashSet::new();
        for root in &self.roots {
            if let Some(hit) =
                self.resolve_in(root, public_owned.as_deref(), system, &mut visited)
            {
                log::debug!(
                    "catalog resolved {:?}/{:?} -> {}",
                    public_owned,
                    system,
                    hit
                );
                return Some(hit);
            }
        }
        None
    }

    /// Resolves a URI reference (the `uri`/`rewriteURI`/`delegateURI`
    /// family). `None` means "use the original".
    pub fn resolve_uri_reference(&self, uri: &str) -> Option<String> {
        let mut visited = HashSet::new();
        for root in &self.roots {
            if let Some(hit) = self.resolve_uri_in(root, uri, &mut visited) {
                return Some(hit);
            }
        }
        None
    }

    fn load(&self, catalog_uri: &str) -> Option<Arc<Catalog>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(catalog_uri) {
            return cached.clone();
        }
        let loaded = match self.read_catalog(catalog_uri) {
            Ok(catalog) => Some(Arc::new(catalog)),
            Err(e) => {
                log::warn!("skipping unreadable catalog {}: {}", catalog_uri, e);
                None
            }
        };
        cache.insert(catalog_uri.to_string(), loaded.clone());
        loaded
    }

    fn read_catalog(&self, catalog_uri: &str) -> Result<Catalog> {
        let input = open_system_id(catalog_uri)?;
        let mut bytes = Vec::new();
        if let crate::input::InputKind::Reader(mut reader) = input.kind {
            std::io::Read::read_to_end(&mut reader, &mut bytes)?;
        }
        Catalog::parse(catalog_uri, &bytes)
    }

    fn resolve_in(
        &self,
        catalog_uri: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        if !visited.insert(catalog_uri.to_string()) {
            log::warn!("catalog cycle through {}", catalog_uri);
            return None;
        }
        let catalog = self.load(catalog_uri)?;

        // Public entries recorded under prefer="public" outrank system
        // matching when a public identifier is at hand.
        if let Some(public) = public_id {
            for entry in &catalog.entries {
                if let CatalogEntry::Public {
                    public_id: candidate,
                    uri,
                    prefer_public: true,
                } = entry
                {
                    if candidate == public {
                        return Some(uri.clone());
                    }
                }
            }
        }

        if let Some(system) = system_id {
            for entry in &catalog.entries {
                if let CatalogEntry::System {
                    system_id: candidate,
                    uri,
                } = entry
                {
                    if candidate == system {
                        return Some(uri.clone());
                    }
                }
            }

            // Longest rewrite prefix wins.
            let mut best: Option<(&str, &str)> = None;
            for entry in &catalog.entries {
                if let CatalogEntry::RewriteSystem { prefix, rewrite } = entry {
                    if system.starts_with(prefix.as_str())
                        && best.map_or(true, |(p, _)| prefix.len() > p.len())
                    {
                        best = Some((prefix, rewrite));
                    }
                }
            }
            if let Some((prefix, rewrite)) = best {
                return Some(format!("{}{}", rewrite, &system[prefix.len()..]));
            }

            let mut delegates: Vec<(&str, &str)> = catalog
                .entries
                .iter()
                .filter_map(|entry| match entry {
                    CatalogEntry::DelegateSystem { prefix, catalog }
                        if system.starts_with(prefix.as_str()) =>
                    {
                        Some((prefix.as_str(), catalog.as_str()))
                    }
                    _ => None,
                })
                .collect();
            delegates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            for (_, delegated) in delegates {
                if let Some(hit) = self.resolve_in(delegated, public_id, system_id, visited) {
                    return Some(hit);
                }
            }
        }

        if let Some(public) = public_id {
            // System-preferred public entries apply once system matching is
            // exhausted, or when there was no system identifier at all.
            for entry in &catalog.entries {
                if let CatalogEntry::Public {
                    public_id: candidate,
                    uri,
                    prefer_public: false,
                } = entry
                {
                    if candidate == public && system_id.is_none() {
                        return Some(uri.clone());
                    }
                }
            }

            let mut delegates: Vec<(&str, &str)> = catalog
                .entries
                .iter()
                .filter_map(|entry| match entry {
                    CatalogEntry::DelegatePublic { prefix, catalog }
                        if public.starts_with(prefix.as_str()) =>
                    {
                        Some((prefix.as_str(), catalog.as_str()))
                    }
                    _ => None,
                })
                .collect();
            delegates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            for (_, delegated) in delegates {
                if let Some(hit) = self.resolve_in(delegated, public_id, system_id, visited) {
                    return Some(hit);
                }
            }
        }

        for entry in &catalog.entries {
            if let CatalogEntry::NextCatalog { catalog: next } = entry {
                if let Some(hit) = self.resolve_in(next, public_id, system_id, visited) {
                    return Some(hit);
                }
            }
        }
        None
    }

    fn resolve_uri_in(
        &self,
        catalog_uri: &str,
        uri: &str,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        if !visited.insert(catalog_uri.to_string()) {
            return None;
        }
        let catalog = self.load(catalog_uri)?;

        for entry in &catalog.entries {
            if let CatalogEntry::Uri { name, uri: target } = entry {
                if name == uri {
                    return Some(target.clone());
                }
            }
        }

        let mut best: Option<(&str, &str)> = None;
        for entry in &catalog.entries {
            if let CatalogEntry::RewriteUri { prefix, rewrite } = entry {
                if uri.starts_with(prefix.as_str())
                    && best.map_or(true, |(p, _)| prefix.len() > p.len())
                {
                    best = Some((prefix, rewrite));
                }
            }
        }
        if let Some((prefix, rewrite)) = best {
            return Some(format!("{}{}", rewrite, &uri[prefix.len()..]));
        }

        let mut delegates: Vec<(&str, &str)> = catalog
            .entries
            .iter()
            .filter_map(|entry| match entry {
                CatalogEntry::DelegateUri { prefix, catalog } if uri.starts_with(prefix.as_str()) => {
                    Some((prefix.as_str(), catalog.as_str()))
                }
                _ => None,
            })
            .collect();
        delegates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        for (_, delegated) in delegates {
            if let Some(hit) = self.resolve_uri_in(delegated, uri, visited) {
                return Some(hit);
            }
        }

        for entry in &catalog.entries {
            if let CatalogEntry::NextCatalog { catalog: next } = entry {
                if let Some(hit) = self.resolve_uri_in(next, uri, visited) {
                    return Some(hit);
                }
            }
        }
        None
    }
}

/// Splits a catalog path list on `;` and, where `:` is the OS path-list
/// separator, on `:` too — except when the colon is part of a URI scheme.
fn split_path_list(list: &str) -> Vec<String> {
    let colon_separates = !cfg!(windows);
    let bytes = list.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let is_separator = b == b';'
            || (b == b':' && colon_separates && !list[i + 1..].starts_with("//"));
        if is_separator {
            parts.push(list[start..i].trim().to_string());
            start = i + 1;
        }
    }
    parts.push(list[start..].trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Unwraps a `urn:publicid:` URN (RFC 3151) back into a public identifier.
pub(crate) fn unwrap_publicid_urn(urn: &str) -> Option<String> {
    let rest = urn.strip_prefix("urn:publicid:")?;
    let mut out = String::with_capacity(rest.len());
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            ':' => out.push_str("//"),
            ';' => out.push_str("::"),
            '%' => {
                let hex: String = chars.by_ref().take(2).collect();
                match hex.to_ascii_uppercase().as_str() {
                    "2B" => out.push('+'),
                    "3A" => out.push(':'),
                    "2F" => out.push('/'),
                    "3B" => out.push(';'),
                    "27" => out.push('\''),
                    "3F" => out.push('?'),
                    "23" => out.push('#'),
                    "25" => out.push('%'),
                    _ => {
                        out.push('%');
                        out.push_str(&hex);
                    }
                }
            }
            c => out.push(c),
        }
    }
    Some(out)
}
