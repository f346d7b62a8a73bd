//! The scanner: a positioned character stream over a single entity.
//!
//! Bytes from the entity's input are decoded incrementally into a growing
//! character buffer; the scanner hands out characters with line/column
//! tracking, lookahead, literal matching and bounded backtracking through
//! mark/reset handles. Carriage returns are normalized away before anything
//! above this layer sees them: `\r`, `\n` and `\r\n` all arrive as a single
//! `\n`.

use crate::encoding::{
    compatible_family, detect_encoding, should_switch, CodeConverter, ConverterRegistry,
    DecodePolicies, Decoder, EncodingRef,
};
use crate::errors::{Error, Result};
use crate::input::{ByteSource, InputKind};

/// How many bytes to pull from the input per refill once the encoding is
/// settled.
const READ_CHUNK: usize = 8 * 1024;

/// Default read-ahead limit for mark/reset, in characters.
pub const DEFAULT_READ_LIMIT: usize = 1024;

/// A saved scanner position for bounded backtracking.
///
/// A mark stays valid until the scanner has read more than its read-ahead
/// limit past it; [`Scanner::reset`] on an invalidated mark reports
/// [`Error::MarkInvalidated`], which the parser treats as fatal.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    abs: u64,
    line: u64,
    column: u64,
}

struct ByteFeed<'i> {
    reader: Option<Box<dyn std::io::Read + 'i>>,
    byte_buf: Vec<u8>,
    byte_head: usize,
    reader_eof: bool,
    flushed: bool,
    decoder: Decoder,
    encoding: EncodingRef,
    /// Decode a single byte per step while the encoding may still be
    /// refined by the XML declaration. This guarantees the converter holds
    /// no partial sequence at the switch point.
    trickle: bool,
}

impl<'i> ByteFeed<'i> {
    fn refill_bytes(&mut self) -> Result<()> {
        if self.byte_head < self.byte_buf.len() || self.reader_eof {
            return Ok(());
        }
        self.byte_buf.clear();
        self.byte_head = 0;
        match &mut self.reader {
            Some(reader) => {
                self.byte_buf.resize(READ_CHUNK, 0);
                let n = ByteSource::read(reader, &mut self.byte_buf)?;
                self.byte_buf.truncate(n);
                if n == 0 {
                    self.reader_eof = true;
                }
            }
            None => self.reader_eof = true,
        }
        Ok(())
    }
}

/// Positioned character source over one entity.
pub struct Scanner<'i> {
    buf: Vec<char>,
    head: usize,
    /// Absolute character offset of `buf[0]` inside the entity.
    base: u64,
    line: u64,
    column: u64,
    read_limit: usize,
    /// Absolute offsets of outstanding marks, oldest first.
    marks: Vec<u64>,
    /// Marks below this offset have been sacrificed to the read limit.
    invalid_below: u64,
    pending_cr: bool,
    feed: Option<ByteFeed<'i>>,
    scratch: String,
}

impl<'i> Scanner<'i> {
    /// Builds a scanner over an entity input, running encoding
    /// autodetection unless the input carries a declared encoding or is
    /// already a character stream.
    pub fn from_input(
        kind: InputKind<'i>,
        hint: Option<&str>,
        registry: &ConverterRegistry,
        policies: DecodePolicies,
        read_limit: usize,
    ) -> Result<Scanner<'i>> {
        let mut scanner = Scanner {
            buf: Vec::with_capacity(usize::max(2 * read_limit, 4096)),
            head: 0,
            base: 0,
            line: 1,
            column: 1,
            read_limit,
            marks: Vec::new(),
            invalid_below: 0,
            pending_cr: false,
            feed: None,
            scratch: String::new(),
        };

        let (mut byte_buf, reader): (Vec<u8>, Option<Box<dyn std::io::Read + 'i>>) = match kind {
            InputKind::Str(text) => {
                scanner.append_normalized(text);
                return Ok(scanner);
            }
            InputKind::Bytes(bytes) => (bytes.to_vec(), None),
            InputKind::OwnedBytes(bytes) => (bytes, None),
            InputKind::Reader(reader) => (Vec::new(), Some(reader)),
        };

        let mut reader = reader;
        let mut reader_eof = reader.is_none();
        // Pull enough bytes to sniff the encoding.
        while byte_buf.len() < 4 && !reader_eof {
            let mut probe = [0u8; 4];
            let reader_ref = reader.as_mut().expect("reader present");
            let n = ByteSource::read(reader_ref, &mut probe[..4 - byte_buf.len()])?;
            if n == 0 {
                reader_eof = true;
            } else {
                byte_buf.extend_from_slice(&probe[..n]);
            }
        }

        let (encoding, bom_len) = match hint {
            Some(label) => (
                EncodingRef::Explicit(label.to_string()),
                bom_length(label, &byte_buf),
            ),
            None => match detect_encoding(&byte_buf) {
                Some(found) => (EncodingRef::BomDetected(found.label), found.bom_len),
                None => (EncodingRef::Implicit("utf-8"), 0),
            },
        };
        let converter = registry
            .make(encoding.label())
            .ok_or_else(|| Error::UnknownEncoding(encoding.label().to_string()))?;
        log::trace!(
            "scanner opened with encoding {} ({} BOM bytes)",
            converter.name(),
            bom_len
        );

        let trickle = encoding.can_be_refined();
        scanner.feed = Some(ByteFeed {
            reader,
            byte_buf,
            byte_head: bom_len,
            reader_eof,
            flushed: false,
            decoder: Decoder::new(converter, policies),
            encoding,
            trickle,
        });
        Ok(scanner)
    }

    /// A scanner over already decoded text, used for internal entities.
    /// Replacement text went through a scanner when it was declared, so it
    /// arrives normalized; normalizing again is harmless.
    pub fn from_chars(text: &str) -> Scanner<'static> {
        let mut scanner = Scanner {
            buf: Vec::with_capacity(text.len()),
            head: 0,
            base: 0,
            line: 1,
            column: 1,
            read_limit: DEFAULT_READ_LIMIT,
            marks: Vec::new(),
            invalid_below: 0,
            pending_cr: false,
            feed: None,
            scratch: String::new(),
        };
        scanner.append_normalized(text);
        scanner
    }

    /// The encoding of the underlying byte stream, if there is one.
    pub fn encoding(&self) -> Option<&EncodingRef> {
        self.feed.as_ref().map(|f| &f.encoding)
    }

    /// Finalizes the encoding once the XML or text declaration has been
    /// parsed (or found absent).
    ///
    /// A declared label that disagrees with a byte-order-detected family is
    /// an error; within the ASCII-compatible family the converter is
    /// switched for the rest of the entity.
    pub fn finalize_encoding(
        &mut self,
        declared: Option<&str>,
        registry: &ConverterRegistry,
    ) -> Result<()> {
        let feed = match &mut self.feed {
            Some(feed) => feed,
            None => return Ok(()),
        };
        if let Some(label) = declared {
            if feed.encoding.can_be_refined() {
                let current = feed.decoder.encoding();
                if !compatible_family(current, label) {
                    return Err(Error::IncompatibleEncoding {
                        detected: current,
                        declared: label.to_string(),
                    });
                }
                if should_switch(current, label) {
                    let converter: Box<dyn CodeConverter> = registry
                        .make(label)
                        .ok_or_else(|| Error::UnknownEncoding(label.to_string()))?;
                    feed.decoder.switch_converter(converter);
                }
                feed.encoding = EncodingRef::XmlDetected(label.to_string());
            }
        }
        feed.trickle = false;
        Ok(())
    }

    /// Looks `n` characters ahead without consuming; `None` at end of
    /// entity.
    pub fn peek(&mut self, n: usize) -> Result<Option<char>> {
        self.ensure(n + 1)?;
        Ok(self.buf.get(self.head + n).copied())
    }

    /// Consumes one character. `None` at end of entity.
    pub fn advance(&mut self) -> Result<Option<char>> {
        self.ensure(1)?;
        match self.buf.get(self.head).copied() {
            Some(c) => {
                self.head += 1;
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                if !self.marks.is_empty() {
                    self.enforce_read_limit();
                }
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    /// Consumes `literal` if the stream starts with it; otherwise leaves the
    /// position untouched.
    pub fn try_match(&mut self, literal: &str) -> Result<bool> {
        let count = literal.chars().count();
        self.ensure(count)?;
        if self.buf.len() - self.head < count {
            return Ok(false);
        }
        for (i, c) in literal.chars().enumerate() {
            if self.buf[self.head + i] != c {
                return Ok(false);
            }
        }
        for _ in 0..count {
            self.advance()?;
        }
        Ok(true)
    }

    /// Consumes characters while `pred` holds, returning how many went by.
    pub fn skip_while(&mut self, mut pred: impl FnMut(char) -> bool) -> Result<usize> {
        let mut count = 0;
        while let Some(c) = self.peek(0)? {
            if !pred(c) {
                break;
            }
            self.advance()?;
            count += 1;
        }
        Ok(count)
    }

    /// Consumes characters while `pred` holds, appending them to `out`.
    pub fn take_while(
        &mut self,
        mut pred: impl FnMut(char) -> bool,
        out: &mut String,
    ) -> Result<usize> {
        let mut count = 0;
        while let Some(c) = self.peek(0)? {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.advance()?;
            count += 1;
        }
        Ok(count)
    }

    /// True once every character of the entity has been consumed.
    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(self.peek(0)?.is_none())
    }

    /// Current 1-based line and column.
    pub fn position(&self) -> (u64, u64) {
        (self.line, self.column)
    }

    /// Saves the current position for a later [`reset`](Self::reset).
    pub fn mark(&mut self) -> Mark {
        let abs = self.base + self.head as u64;
        self.marks.push(abs);
        Mark {
            abs,
            line: self.line,
            column: self.column,
        }
    }

    /// Discards a mark without moving, committing everything read since.
    pub fn release(&mut self, mark: Mark) {
        if let Some(i) = self.marks.iter().rposition(|&m| m == mark.abs) {
            self.marks.remove(i);
        }
    }

    /// Moves back to a marked position. Fails with
    /// [`Error::MarkInvalidated`] when more than the read-ahead limit was
    /// consumed since the mark was taken.
    pub fn reset(&mut self, mark: Mark) -> Result<()> {
        if mark.abs < self.invalid_below || mark.abs < self.base {
            return Err(Error::MarkInvalidated);
        }
        self.head = (mark.abs - self.base) as usize;
        self.line = mark.line;
        self.column = mark.column;
        self.release(mark);
        Ok(())
    }

    /// Makes sure at least `want` unread characters are buffered, unless the
    /// entity ends first.
    fn ensure(&mut self, want: usize) -> Result<()> {
        while self.buf.len() - self.head < want {
            let feed = match &mut self.feed {
                Some(feed) => feed,
                None => return Ok(()),
            };
            if feed.flushed {
                return Ok(());
            }

            feed.refill_bytes()?;
            self.scratch.clear();
            if feed.byte_head == feed.byte_buf.len() && feed.reader_eof {
                // Flush the converter's carry; a dangling partial sequence
                // surfaces here per the malformed policy.
                feed.decoder.decode(&[], true, &mut self.scratch)?;
                feed.flushed = true;
            } else {
                let end = if feed.trickle {
                    feed.byte_head + 1
                } else {
                    feed.byte_buf.len()
                };
                let consumed =
                    feed.decoder
                        .decode(&feed.byte_buf[feed.byte_head..end], false, &mut self.scratch)?;
                feed.byte_head += consumed;
            }
            let text = std::mem::take(&mut self.scratch);
            self.append_normalized(&text);
            self.scratch = text;
            self.enforce_read_limit();
            self.compact();
        }
        Ok(())
    }

    fn append_normalized(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => {
                    self.buf.push('\n');
                    self.pending_cr = true;
                }
                '\n' if self.pending_cr => {
                    self.pending_cr = false;
                }
                _ => {
                    self.buf.push(c);
                    self.pending_cr = false;
                }
            }
        }
    }

    /// A mark survives until more than `read_limit` characters have been
    /// consumed past it; how much is merely buffered does not count.
    fn enforce_read_limit(&mut self) {
        let consumed = self.base + self.head as u64;
        while let Some(&first) = self.marks.first() {
            if consumed.saturating_sub(first) > self.read_limit as u64 {
                self.invalid_below = first + 1;
                self.marks.remove(0);
            } else {
                break;
            }
        }
    }

    fn compact(&mut self) {
        let protect = self
            .marks
            .first()
            .copied()
            .unwrap_or(self.base + self.head as u64);
        let keep_from = (protect - self.base) as usize;
        if keep_from >= 4096 {
            self.buf.drain(..keep_from);
            self.base += keep_from as u64;
            self.head -= keep_from;
        }
    }
}

/// BOM length to strip when the caller declared the encoding up front and
/// the stream still starts with the matching byte order mark.
fn bom_length(label: &str, bytes: &[u8]) -> usize {
    let lower = label.to_ascii_lowercase();
    if lower.starts_with("utf-8") && bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        3
    } else if lower.starts_with("utf-32") || lower.starts_with("ucs-4") {
        if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) || bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00])
        {
            4
        } else {
            0
        }
    } else if lower.starts_with("utf-16") {
        if bytes.starts_with(&[0xFE, 0xFF]) || bytes.starts_with(&[0xFF, 0xFE]) {
            2
        } else {
            0
        }
    } else {
        0
    }
}
