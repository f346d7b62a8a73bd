//! Module for the [`ByteSource`] trait and the [`EntityInput`] type the
//! parser consumes.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::errors::Result;

/// A pull-based source of raw bytes.
///
/// This is the only thing the parser wants from the outside world for an
/// external entity: `read` fills as much of `buf` as convenient and returns
/// the number of bytes written, with `0` meaning end of input. Filter
/// layering composes by wrapping.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Any `std::io::Read` works as a byte source.
impl<R: Read> ByteSource for R {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match Read::read(self, buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub(crate) enum InputKind<'i> {
    /// Borrowed raw bytes; encoding autodetection applies.
    Bytes(&'i [u8]),
    /// Owned raw bytes, used by resolvers that build entities on the fly.
    OwnedBytes(Vec<u8>),
    /// An already decoded character stream; detection is skipped.
    Str(&'i str),
    /// A byte stream pulled on demand.
    Reader(Box<dyn Read + 'i>),
}

/// A single input for one XML entity: identifiers, an optional declared
/// encoding, and the bytes (or characters) themselves.
///
/// The caller keeps ownership of borrowed data; the parser holds the input
/// only for the duration of the parse.
pub struct EntityInput<'i> {
    system_id: String,
    public_id: Option<String>,
    base_uri: Option<String>,
    encoding: Option<String>,
    pub(crate) kind: InputKind<'i>,
}

impl<'i> EntityInput<'i> {
    /// An input over a byte slice. The encoding is autodetected unless
    /// [`with_encoding`](Self::with_encoding) names one.
    pub fn from_bytes(system_id: impl Into<String>, bytes: &'i [u8]) -> Self {
        EntityInput {
            system_id: system_id.into(),
            public_id: None,
            base_uri: None,
            encoding: None,
            kind: InputKind::Bytes(bytes),
        }
    }

    /// An input over an already decoded string; encoding detection is
    /// skipped entirely.
    pub fn from_str(system_id: impl Into<String>, text: &'i str) -> Self {
        EntityInput {
            system_id: system_id.into(),
            public_id: None,
            base_uri: None,
            encoding: None,
            kind: InputKind::Str(text),
        }
    }

    /// An input pulling bytes from a reader.
    pub fn from_reader(system_id: impl Into<String>, reader: impl Read + 'i) -> Self {
        EntityInput {
            system_id: system_id.into(),
            public_id: None,
            base_uri: None,
            encoding: None,
            kind: InputKind::Reader(Box::new(reader)),
        }
    }

    /// An input owning its bytes, for resolver-fabricated entities.
    pub fn from_owned_bytes(system_id: impl Into<String>, bytes: Vec<u8>) -> EntityInput<'static> {
        EntityInput {
            system_id: system_id.into(),
            public_id: None,
            base_uri: None,
            encoding: None,
            kind: InputKind::OwnedBytes(bytes),
        }
    }

    /// Opens a file; its path becomes the system identifier.
    pub fn from_file(path: impl AsRef<Path>) -> Result<EntityInput<'static>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(EntityInput {
            system_id: path.to_string_lossy().into_owned(),
            public_id: None,
            base_uri: None,
            encoding: None,
            kind: InputKind::Reader(Box::new(BufReader::new(file))),
        })
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    /// Declares the encoding up front, bypassing autodetection.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    /// The URI relative references inside this entity resolve against.
    /// Defaults to the system identifier.
    pub fn base_uri(&self) -> &str {
        self.base_uri.as_deref().unwrap_or(&self.system_id)
    }

    pub fn encoding_hint(&self) -> Option<&str> {
        self.encoding.as_deref()
    }
}

/// Opens the resource a system identifier points at. Only `file:` URIs and
/// plain paths are supported; anything else is the resolver's job.
pub(crate) fn open_system_id(system_id: &str) -> Result<EntityInput<'static>> {
    let path = strip_file_scheme(system_id);
    let file = File::open(path)?;
    Ok(EntityInput {
        system_id: system_id.to_string(),
        public_id: None,
        base_uri: None,
        encoding: None,
        kind: InputKind::Reader(Box::new(BufReader::new(file))),
    })
}

fn strip_file_scheme(uri: &str) -> &str {
    if let Some(rest) = uri.strip_prefix("file://") {
        // file://host/path is not supported; file:///path is the common case.
        rest.strip_prefix("localhost").unwrap_or(rest)
    } else if let Some(rest) = uri.strip_prefix("file:") {
        rest
    } else {
        uri
    }
}

/// Resolves `reference` against `base` with the subset of RFC 3986 merging
/// that file-ish URIs need: absolute references (scheme or leading `/`) win,
/// otherwise the reference replaces the last path segment of the base and
/// `./` / `../` segments are folded.
pub(crate) fn resolve_uri(base: &str, reference: &str) -> String {
    if reference.is_empty() {
        return base.to_string();
    }
    if has_scheme(reference) || reference.starts_with('/') {
        return reference.to_string();
    }
    let dir = match base.rfind('/') {
        Some(i) => &base[..=i],
        None => "",
    };
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    let absolute = dir.starts_with('/');
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    if reference.ends_with('/') {
        out.push('/');
    }
    out
}

fn has_scheme(uri: &str) -> bool {
    let mut chars = uri.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for c in chars {
        match c {
            ':' => return true,
            c if c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.' => {}
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_uri_falls_back_to_system_id() {
        let input = EntityInput::from_bytes("doc.xml", b"<r/>");
        assert_eq!(input.base_uri(), "doc.xml");
        let input = input.with_base_uri("/data/doc.xml");
        assert_eq!(input.base_uri(), "/data/doc.xml");
    }

    #[test]
    fn relative_resolution() {
        assert_eq!(resolve_uri("/a/b/doc.xml", "dtd/x.dtd"), "/a/b/dtd/x.dtd");
        assert_eq!(resolve_uri("/a/b/doc.xml", "../x.dtd"), "/a/x.dtd");
        assert_eq!(resolve_uri("/a/b/doc.xml", "./x.dtd"), "/a/b/x.dtd");
        assert_eq!(resolve_uri("doc.xml", "x.dtd"), "x.dtd");
        assert_eq!(resolve_uri("/a/doc.xml", "/x.dtd"), "/x.dtd");
        assert_eq!(
            resolve_uri("/a/doc.xml", "http://example.com/x.dtd"),
            "http://example.com/x.dtd"
        );
    }

    #[test]
    fn file_scheme_stripping() {
        assert_eq!(strip_file_scheme("file:///tmp/x.dtd"), "/tmp/x.dtd");
        assert_eq!(strip_file_scheme("file:/tmp/x.dtd"), "/tmp/x.dtd");
        assert_eq!(strip_file_scheme("/tmp/x.dtd"), "/tmp/x.dtd");
    }
}
