//! Byte ↔ Unicode code conversion.
//!
//! Conversion is split in two layers. A [`CodeConverter`] turns bytes of one
//! encoding into characters, carrying partial trailing sequences across
//! calls and reporting malformed sequences without deciding what to do about
//! them. The [`Decoder`] drives a converter and applies the per-instance
//! [`ErrorPolicy`] for malformed input. Converters for UTF-8, UTF-16 and the
//! single-byte windows/ISO families are backed by `encoding_rs`; UTF-32,
//! strict US-ASCII and ISO-8859-1 are implemented here.

mod detect;
mod utf32;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use encoding_rs::{DecoderResult, EncoderResult, Encoding};

use crate::errors::{Error, Result};

pub use self::detect::{compatible_family, detect_encoding, should_switch, Detected};
pub use self::utf32::Utf32Converter;

/// Outcome of one [`CodeConverter::decode`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// All input was consumed. A partial trailing sequence may be held back
    /// inside the converter until the next call.
    InputEmpty,
    /// A malformed sequence of the given length was consumed. The driver
    /// decides whether that is fatal.
    Malformed(u8),
    /// All input was consumed, `last` was set and no partial sequence
    /// remains.
    Done,
}

/// What one decode step consumed and produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStep {
    pub bytes_read: usize,
    pub chars_written: usize,
    pub status: DecodeStatus,
}

/// A stateful byte → character converter for one encoding.
pub trait CodeConverter {
    /// The canonical name of the encoding this converter reads.
    fn name(&self) -> &'static str;

    /// Decodes as much of `input` as possible, appending to `output`.
    ///
    /// Returns early when a malformed sequence is found so the caller can
    /// apply its error policy; the malformed bytes count as read. `last`
    /// declares end of input, turning a held-back partial sequence into a
    /// malformed one.
    fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> DecodeStep;
}

/// What to do when a converter reports a malformed sequence (decoding) or an
/// unmappable character (encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Surface the problem as an error. The parser treats it as fatal.
    Fail,
    /// Substitute the configured replacement character and continue.
    Replace,
    /// Drop the offending sequence and continue.
    Ignore,
}

/// Per-decoder error handling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodePolicies {
    pub malformed: ErrorPolicy,
    pub unmappable: ErrorPolicy,
    pub replacement: char,
}

impl Default for DecodePolicies {
    fn default() -> Self {
        DecodePolicies {
            malformed: ErrorPolicy::Fail,
            unmappable: ErrorPolicy::Fail,
            replacement: '\u{FFFD}',
        }
    }
}

/// Drives a [`CodeConverter`] and applies the configured policies.
pub struct Decoder {
    converter: Box<dyn CodeConverter>,
    policies: DecodePolicies,
}

impl Decoder {
    pub fn new(converter: Box<dyn CodeConverter>, policies: DecodePolicies) -> Self {
        Decoder {
            converter,
            policies,
        }
    }

    /// The name of the encoding currently being decoded.
    pub fn encoding(&self) -> &'static str {
        self.converter.name()
    }

    /// Replaces the converter, keeping the policies.
    ///
    /// Used when the `encoding=` pseudo-attribute of an XML or text
    /// declaration refines a provisional choice. The caller must make sure
    /// the old converter holds no partial sequence; the scanner guarantees
    /// that by trickling single bytes until the declaration is parsed.
    pub fn switch_converter(&mut self, converter: Box<dyn CodeConverter>) {
        log::debug!(
            "switching decoder {} -> {}",
            self.converter.name(),
            converter.name()
        );
        self.converter = converter;
    }

    /// Decodes `input` into `output`, returning the number of bytes
    /// consumed. Malformed sequences are resolved per policy; with
    /// [`ErrorPolicy::Fail`] the first one is returned as an error.
    pub fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> Result<usize> {
        let mut consumed = 0;
        loop {
            let step = self.converter.decode(&input[consumed..], last, output);
            consumed += step.bytes_read;
            match step.status {
                DecodeStatus::InputEmpty | DecodeStatus::Done => return Ok(consumed),
                DecodeStatus::Malformed(_) => match self.policies.malformed {
                    ErrorPolicy::Fail => return Err(Error::MalformedInput(self.converter.name())),
                    ErrorPolicy::Replace => output.push(self.policies.replacement),
                    ErrorPolicy::Ignore => {}
                },
            }
        }
    }
}

/// Strict 7-bit US-ASCII. Any byte with the high bit set is malformed;
/// `encoding_rs` would silently widen the label to windows-1252 instead.
pub struct AsciiConverter;

impl CodeConverter for AsciiConverter {
    fn name(&self) -> &'static str {
        "US-ASCII"
    }

    fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> DecodeStep {
        for (i, &b) in input.iter().enumerate() {
            if b >= 0x80 {
                return DecodeStep {
                    bytes_read: i + 1,
                    chars_written: i,
                    status: DecodeStatus::Malformed(1),
                };
            }
            output.push(b as char);
        }
        DecodeStep {
            bytes_read: input.len(),
            chars_written: input.len(),
            status: if last {
                DecodeStatus::Done
            } else {
                DecodeStatus::InputEmpty
            },
        }
    }
}

/// A converter defined by a 256-entry table mapping each byte to a BMP code
/// point. Entries of `0xFFFF` mark bytes with no mapping.
pub struct SingleByteConverter {
    name: &'static str,
    table: &'static [u16; 256],
}

impl SingleByteConverter {
    pub fn new(name: &'static str, table: &'static [u16; 256]) -> Self {
        SingleByteConverter { name, table }
    }
}

impl CodeConverter for SingleByteConverter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> DecodeStep {
        for (i, &b) in input.iter().enumerate() {
            match self.table[b as usize] {
                0xFFFF => {
                    return DecodeStep {
                        bytes_read: i + 1,
                        chars_written: i,
                        status: DecodeStatus::Malformed(1),
                    }
                }
                cp => output.push(char::from_u32(cp as u32).unwrap_or('\u{FFFD}')),
            }
        }
        DecodeStep {
            bytes_read: input.len(),
            chars_written: input.len(),
            status: if last {
                DecodeStatus::Done
            } else {
                DecodeStatus::InputEmpty
            },
        }
    }
}

/// ISO-8859-1 maps every byte to the identical code point.
static LATIN1_TABLE: OnceLock<[u16; 256]> = OnceLock::new();

fn latin1_table() -> &'static [u16; 256] {
    LATIN1_TABLE.get_or_init(|| {
        let mut t = [0u16; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = i as u16;
        }
        t
    })
}

/// Adapter over an `encoding_rs` decoder.
struct RsConverter {
    encoding: &'static Encoding,
    inner: encoding_rs::Decoder,
}

impl RsConverter {
    fn boxed(encoding: &'static Encoding) -> Box<dyn CodeConverter> {
        Box::new(RsConverter {
            encoding,
            inner: encoding.new_decoder_without_bom_handling(),
        })
    }
}

impl CodeConverter for RsConverter {
    fn name(&self) -> &'static str {
        self.encoding.name()
    }

    fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> DecodeStep {
        let start_chars = output.chars().count();
        let mut bytes_read = 0;
        loop {
            output.reserve(64 + input.len() - bytes_read);
            let (result, read) = self.inner.decode_to_string_without_replacement(
                &input[bytes_read..],
                output,
                last,
            );
            bytes_read += read;
            match result {
                DecoderResult::InputEmpty => {
                    return DecodeStep {
                        bytes_read,
                        chars_written: output.chars().count() - start_chars,
                        status: if last {
                            DecodeStatus::Done
                        } else {
                            DecodeStatus::InputEmpty
                        },
                    };
                }
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(len, extra) => {
                    return DecodeStep {
                        bytes_read,
                        chars_written: output.chars().count() - start_chars,
                        status: DecodeStatus::Malformed(len.saturating_add(extra)),
                    };
                }
            }
        }
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn CodeConverter> + Send + Sync>;

/// Resolves encoding labels to converters.
///
/// Labels are matched case-insensitively. The registry first consults its
/// own entries (UTF-32, strict US-ASCII, ISO-8859-1 and anything registered
/// by the caller) and then falls back to the `encoding_rs` label set.
/// Construction is explicit; [`ConverterRegistry::global`] offers the
/// zero-configuration default.
pub struct ConverterRegistry {
    entries: HashMap<String, Factory>,
}

impl ConverterRegistry {
    /// A registry with the built-in converter set.
    pub fn with_defaults() -> Self {
        let mut registry = ConverterRegistry {
            entries: HashMap::new(),
        };
        registry.register_many(&["utf-32", "utf-32le", "ucs-4le"], || {
            Box::new(Utf32Converter::little_endian())
        });
        registry.register_many(&["utf-32be", "ucs-4", "ucs-4be"], || {
            Box::new(Utf32Converter::big_endian())
        });
        registry.register_many(&["us-ascii", "ascii", "iso646-us"], || {
            Box::new(AsciiConverter)
        });
        registry.register_many(&["iso-8859-1", "latin1", "l1", "iso_8859-1"], || {
            Box::new(SingleByteConverter::new("ISO-8859-1", latin1_table()))
        });
        registry
    }

    /// The shared default registry, built on first use.
    pub fn global() -> &'static ConverterRegistry {
        static GLOBAL: OnceLock<ConverterRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ConverterRegistry::with_defaults)
    }

    /// Registers a converter factory under a label, replacing any previous
    /// entry for it.
    pub fn register<F>(&mut self, label: &str, factory: F)
    where
        F: Fn() -> Box<dyn CodeConverter> + Send + Sync + 'static,
    {
        self.entries
            .insert(label.to_ascii_lowercase(), Arc::new(factory));
    }

    fn register_many<F>(&mut self, labels: &[&str], factory: F)
    where
        F: Fn() -> Box<dyn CodeConverter> + Send + Sync + Clone + 'static,
    {
        for label in labels {
            self.register(label, factory.clone());
        }
    }

    /// Builds a converter for the given label, or `None` if the label is
    /// unknown to both this registry and `encoding_rs`.
    pub fn make(&self, label: &str) -> Option<Box<dyn CodeConverter>> {
        let normalized = label.trim().to_ascii_lowercase();
        if let Some(factory) = self.entries.get(&normalized) {
            return Some(factory());
        }
        Encoding::for_label(normalized.as_bytes()).map(RsConverter::boxed)
    }

    /// Builds an encoder for the given label, used for writing tests and
    /// the round-trip law. `None` for unknown labels.
    pub fn make_encoder(&self, label: &str) -> Option<CharEncoder> {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "utf-32" | "utf-32le" | "ucs-4le" => Some(CharEncoder::utf32(false)),
            "utf-32be" | "ucs-4" | "ucs-4be" => Some(CharEncoder::utf32(true)),
            "us-ascii" | "ascii" | "iso646-us" => Some(CharEncoder::ascii()),
            "utf-16" | "utf-16le" => Some(CharEncoder::utf16(false)),
            "utf-16be" => Some(CharEncoder::utf16(true)),
            _ => Encoding::for_label(normalized.as_bytes()).map(CharEncoder::rs),
        }
    }
}

enum EncoderKind {
    Rs(encoding_rs::Encoder),
    Utf16 { big_endian: bool },
    Utf32 { big_endian: bool },
    Ascii,
}

/// Character → byte encoder, the write-side counterpart of [`Decoder`].
///
/// Unmappable characters are resolved per policy with `?` as the default
/// replacement, mirroring the decode side.
pub struct CharEncoder {
    kind: EncoderKind,
    pub unmappable: ErrorPolicy,
    pub replacement: u8,
}

impl CharEncoder {
    fn with_kind(kind: EncoderKind) -> Self {
        CharEncoder {
            kind,
            unmappable: ErrorPolicy::Fail,
            replacement: b'?',
        }
    }

    fn rs(encoding: &'static Encoding) -> Self {
        Self::with_kind(EncoderKind::Rs(encoding.new_encoder()))
    }

    fn utf16(big_endian: bool) -> Self {
        Self::with_kind(EncoderKind::Utf16 { big_endian })
    }

    fn utf32(big_endian: bool) -> Self {
        Self::with_kind(EncoderKind::Utf32 { big_endian })
    }

    fn ascii() -> Self {
        Self::with_kind(EncoderKind::Ascii)
    }

    /// Encodes `input`, appending the bytes to `output`.
    pub fn encode(&mut self, input: &str, last: bool, output: &mut Vec<u8>) -> Result<()> {
        match &mut self.kind {
            EncoderKind::Rs(encoder) => {
                let mut rest = input;
                loop {
                    output.reserve(64 + rest.len() * 2);
                    let (result, read) =
                        encoder.encode_from_utf8_to_vec_without_replacement(rest, output, last);
                    rest = &rest[read..];
                    match result {
                        EncoderResult::InputEmpty => return Ok(()),
                        EncoderResult::OutputFull => continue,
                        EncoderResult::Unmappable(c) => match self.unmappable {
                            ErrorPolicy::Fail => return Err(Error::UnmappableChar(c)),
                            ErrorPolicy::Replace => output.push(self.replacement),
                            ErrorPolicy::Ignore => {}
                        },
                    }
                }
            }
            EncoderKind::Utf16 { big_endian } => {
                for c in input.chars() {
                    let mut units = [0u16; 2];
                    for unit in c.encode_utf16(&mut units) {
                        let bytes = if *big_endian {
                            unit.to_be_bytes()
                        } else {
                            unit.to_le_bytes()
                        };
                        output.extend_from_slice(&bytes);
                    }
                }
                Ok(())
            }
            EncoderKind::Utf32 { big_endian } => {
                for c in input.chars() {
                    let bytes = if *big_endian {
                        (c as u32).to_be_bytes()
                    } else {
                        (c as u32).to_le_bytes()
                    };
                    output.extend_from_slice(&bytes);
                }
                Ok(())
            }
            EncoderKind::Ascii => {
                for c in input.chars() {
                    if (c as u32) < 0x80 {
                        output.push(c as u8);
                    } else {
                        match self.unmappable {
                            ErrorPolicy::Fail => return Err(Error::UnmappableChar(c)),
                            ErrorPolicy::Replace => output.push(self.replacement),
                            ErrorPolicy::Ignore => {}
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// A reference to an encoding together with information about how it was
/// chosen.
///
/// The state transition diagram:
///
/// ```mermaid
/// flowchart LR
///   Implicit    -- explicit source --> Explicit
///   Implicit    -- BOM             --> BomDetected
///   Implicit    -- "encoding=..."  --> XmlDetected
///   BomDetected -- "encoding=..."  --> XmlDetected
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingRef {
    /// Encoding was implicitly assumed. It can be refined by a BOM or by the
    /// XML declaration.
    Implicit(&'static str),
    /// Encoding was set by the caller (for example for a `&str` input). It
    /// can never change.
    Explicit(String),
    /// Encoding was detected from a byte order mark or the first bytes of
    /// the content. The XML declaration may still refine it within the same
    /// family.
    BomDetected(&'static str),
    /// Encoding was taken from an XML or text declaration. Final.
    XmlDetected(String),
}

impl EncodingRef {
    #[inline]
    pub fn label(&self) -> &str {
        match self {
            EncodingRef::Implicit(l) | EncodingRef::BomDetected(l) => l,
            EncodingRef::Explicit(l) | EncodingRef::XmlDetected(l) => l,
        }
    }

    #[inline]
    pub fn can_be_refined(&self) -> bool {
        match self {
            EncodingRef::Implicit(_) | EncodingRef::BomDetected(_) => true,
            EncodingRef::Explicit(_) | EncodingRef::XmlDetected(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(label: &str, bytes: &[u8]) -> Result<String> {
        let registry = ConverterRegistry::with_defaults();
        let mut decoder = Decoder::new(
            registry.make(label).expect("known label"),
            DecodePolicies::default(),
        );
        let mut out = String::new();
        decoder.decode(bytes, true, &mut out)?;
        Ok(out)
    }

    #[test]
    fn utf8_with_partial_carry() {
        let registry = ConverterRegistry::with_defaults();
        let mut decoder = Decoder::new(registry.make("utf-8").unwrap(), DecodePolicies::default());
        let bytes = "héllo".as_bytes();
        let mut out = String::new();
        // Split in the middle of the two-byte sequence for 'é'.
        decoder.decode(&bytes[..2], false, &mut out).unwrap();
        decoder.decode(&bytes[2..], true, &mut out).unwrap();
        assert_eq!(out, "héllo");
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        match decode_all("us-ascii", b"ok\x80") {
            Err(Error::MalformedInput("US-ASCII")) => {}
            other => panic!("unexpected: {:?}", other.map(|s| s.to_string())),
        }
    }

    #[test]
    fn latin1_is_identity() {
        assert_eq!(decode_all("iso-8859-1", b"caf\xE9").unwrap(), "café");
    }

    #[test]
    fn replace_policy_substitutes() {
        let registry = ConverterRegistry::with_defaults();
        let mut policies = DecodePolicies::default();
        policies.malformed = ErrorPolicy::Replace;
        let mut decoder = Decoder::new(registry.make("utf-8").unwrap(), policies);
        let mut out = String::new();
        decoder.decode(b"a\xFFb", true, &mut out).unwrap();
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn ignore_policy_drops() {
        let registry = ConverterRegistry::with_defaults();
        let mut policies = DecodePolicies::default();
        policies.malformed = ErrorPolicy::Ignore;
        let mut decoder = Decoder::new(registry.make("utf-8").unwrap(), policies);
        let mut out = String::new();
        decoder.decode(b"a\xFFb", true, &mut out).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn round_trip_supported_encodings() {
        let registry = ConverterRegistry::with_defaults();
        let text = "réseau 中文 plain";
        for label in &["utf-8", "utf-16le", "utf-16be", "utf-32le", "utf-32be"] {
            let mut encoder = registry.make_encoder(label).unwrap();
            let mut bytes = Vec::new();
            encoder.encode(text, true, &mut bytes).unwrap();
            assert_eq!(&decode_all(label, &bytes).unwrap(), text, "{}", label);
        }
    }

    #[test]
    fn labels_are_case_insensitive() {
        let registry = ConverterRegistry::with_defaults();
        assert!(registry.make("UTF-8").is_some());
        assert!(registry.make(" Utf-16BE ").is_some());
        assert!(registry.make("ISO-8859-1").is_some());
        assert!(registry.make("no-such-encoding").is_none());
    }
}
