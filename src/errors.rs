//! Error management module

use std::fmt;
use std::io;

/// A specialized `Result` type where the error is hard-wired to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// How bad a reported parsing problem is.
///
/// The severity decides which [`ErrorHandler`] callback receives the report
/// and whether the parser keeps producing content events afterwards.
///
/// [`ErrorHandler`]: crate::handler::ErrorHandler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A condition worth mentioning that violates no constraint, for example
    /// an unknown element in a catalog file.
    Warning,
    /// A validity-constraint violation. The parser recovers at the next safe
    /// synchronization point and keeps going.
    Error,
    /// A well-formedness violation. No further content events are produced;
    /// `end_document` is still delivered.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
            Severity::Fatal => f.write_str("fatal error"),
        }
    }
}

/// A position inside one entity, for error reports and the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// System identifier of the entity the position refers to.
    pub system_id: String,
    /// Public identifier, when the entity was opened through one.
    pub public_id: Option<String>,
    /// 1-based line.
    pub line: u64,
    /// 1-based column.
    pub column: u64,
}

impl Location {
    pub(crate) fn unknown() -> Self {
        Location {
            system_id: String::new(),
            public_id: None,
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.system_id.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.system_id, self.line, self.column)
        }
    }
}

/// A reported parsing problem: what went wrong, how bad it is and where.
///
/// Every report carries the position inside the entity being read when the
/// problem was detected. When the problem surfaced inside a nested entity
/// (an expanded general or parameter entity), `trace` lists the positions of
/// the enclosing references, innermost first.
#[derive(Debug)]
pub struct ParseError {
    pub severity: Severity,
    pub message: String,
    pub location: Location,
    /// Reference positions of the enclosing entities, innermost first.
    /// Empty when the problem occurred directly in the document entity.
    pub trace: Vec<Location>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ParseError {
    pub(crate) fn new(severity: Severity, message: impl Into<String>, location: Location) -> Self {
        ParseError {
            severity,
            message: message.into(),
            location,
            trace: Vec::new(),
            cause: None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.location, self.message)?;
        for loc in &self.trace {
            write!(f, "\n  referenced from {}", loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

/// The error type used by this crate.
#[derive(Debug)]
pub enum Error {
    /// IO error while pulling bytes from an input or an external entity.
    Io(io::Error),
    /// A byte sequence that is not legal for the active encoding, with the
    /// label of that encoding.
    MalformedInput(&'static str),
    /// A decoded code point that the sink side of a conversion cannot
    /// represent.
    UnmappableChar(char),
    /// The encoding named by an XML or text declaration is not known to the
    /// converter registry.
    UnknownEncoding(String),
    /// The declared encoding is incompatible with the byte pattern the
    /// document actually starts with.
    IncompatibleEncoding {
        detected: &'static str,
        declared: String,
    },
    /// A fatal well-formedness, namespace or validity problem. The same
    /// report was delivered to the registered `ErrorHandler` beforehand.
    Parse(Box<ParseError>),
    /// A handler asked the parser to stop. Entity resources are released and
    /// the signal surfaces unchanged out of `parse`.
    Cancelled,
    /// A `mark` handle was used after reading past the declared read-ahead
    /// limit.
    MarkInvalidated,
    /// A feature name that this parser does not recognize at all.
    UnknownFeature(String),
    /// A feature that exists but cannot be changed, either ever or at this
    /// point of the parser's life cycle.
    ReadOnlyFeature(&'static str),
    /// A property name that this parser does not recognize at all.
    UnknownProperty(String),
    /// A property that is recognized but not supported by this
    /// implementation.
    UnsupportedProperty(&'static str),
}

impl From<io::Error> for Error {
    /// Creates a new `Error::Io` from the given error
    #[inline]
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

impl From<ParseError> for Error {
    #[inline]
    fn from(error: ParseError) -> Error {
        Error::Parse(Box::new(error))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::MalformedInput(enc) => {
                write!(f, "malformed byte sequence for encoding {}", enc)
            }
            Error::UnmappableChar(c) => {
                write!(f, "character U+{:04X} has no representation", *c as u32)
            }
            Error::UnknownEncoding(label) => write!(f, "unknown encoding \"{}\"", label),
            Error::IncompatibleEncoding { detected, declared } => write!(
                f,
                "declared encoding \"{}\" is incompatible with detected {}",
                declared, detected
            ),
            Error::Parse(e) => e.fmt(f),
            Error::Cancelled => f.write_str("parse cancelled by handler"),
            Error::MarkInvalidated => f.write_str("scanner mark invalidated by read-ahead limit"),
            Error::UnknownFeature(name) => write!(f, "unknown feature \"{}\"", name),
            Error::ReadOnlyFeature(name) => write!(f, "feature \"{}\" is read-only", name),
            Error::UnknownProperty(name) => write!(f, "unknown property \"{}\"", name),
            Error::UnsupportedProperty(name) => {
                write!(f, "property \"{}\" is recognized but not supported", name)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Parse(e) => Some(&**e),
            _ => None,
        }
    }
}
