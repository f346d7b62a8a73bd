//! Automatic encoding detection for external entities, following the
//! appendix F algorithm of the XML recommendation.
//!
//! Examines up to the first 4 bytes:
//!
//! | Bytes       | Detected encoding
//! |-------------|--------------------------------------------------
//! |`00 00 FE FF`| UTF-32, big-endian, BOM
//! |`FF FE 00 00`| UTF-32, little-endian, BOM
//! |`FE FF ## ##`| UTF-16, big-endian, BOM
//! |`FF FE ## ##`| UTF-16, little-endian, BOM
//! |`EF BB BF`   | UTF-8, BOM
//! |`00 00 00 3C`| UTF-32, big-endian, no BOM
//! |`3C 00 00 00`| UTF-32, little-endian, no BOM
//! |`00 3C 00 3F`| UTF-16, big-endian, no BOM
//! |`3C 00 3F 00`| UTF-16, little-endian, no BOM
//! |`3C 3F 78 6D`| UTF-8 or another ASCII superset; the declaration decides
//! |_other_      | UTF-8
//!
//! The no-BOM rows are provisional: the `encoding=` pseudo-attribute of the
//! XML declaration may refine them within the same family.

/// Result of sniffing the head of an external entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    /// Label of the provisional converter to start decoding with.
    pub label: &'static str,
    /// Number of leading BOM bytes to strip before decoding.
    pub bom_len: usize,
}

/// Sniffs the first bytes of an entity. Returns `None` when nothing is
/// recognized, in which case UTF-8 without a BOM is assumed.
pub fn detect_encoding(bytes: &[u8]) -> Option<Detected> {
    // The UTF-32 BOMs start with the UTF-16 ones, so test them first.
    match bytes {
        _ if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) => Some(Detected {
            label: "utf-32be",
            bom_len: 4,
        }),
        _ if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) => Some(Detected {
            label: "utf-32le",
            bom_len: 4,
        }),
        _ if bytes.starts_with(&[0xFE, 0xFF]) => Some(Detected {
            label: "utf-16be",
            bom_len: 2,
        }),
        _ if bytes.starts_with(&[0xFF, 0xFE]) => Some(Detected {
            label: "utf-16le",
            bom_len: 2,
        }),
        _ if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) => Some(Detected {
            label: "utf-8",
            bom_len: 3,
        }),

        _ if bytes.starts_with(&[0x00, 0x00, 0x00, b'<']) => Some(Detected {
            label: "utf-32be",
            bom_len: 0,
        }),
        _ if bytes.starts_with(&[b'<', 0x00, 0x00, 0x00]) => Some(Detected {
            label: "utf-32le",
            bom_len: 0,
        }),
        _ if bytes.starts_with(&[0x00, b'<', 0x00, b'?']) => Some(Detected {
            label: "utf-16be",
            bom_len: 0,
        }),
        _ if bytes.starts_with(&[b'<', 0x00, b'?', 0x00]) => Some(Detected {
            label: "utf-16le",
            bom_len: 0,
        }),
        _ if bytes.starts_with(b"<?xm") => Some(Detected {
            label: "utf-8",
            bom_len: 0,
        }),

        _ => None,
    }
}

#[derive(PartialEq, Eq)]
enum Family {
    Utf16,
    Utf32,
    AsciiCompatible,
}

fn family(label: &str) -> Family {
    let lower = label.to_ascii_lowercase();
    if lower.starts_with("utf-16") {
        Family::Utf16
    } else if lower.starts_with("utf-32") || lower.starts_with("ucs-4") {
        Family::Utf32
    } else {
        Family::AsciiCompatible
    }
}

/// Whether an encoding declared in the XML declaration can take over from
/// the provisionally detected one without re-reading anything.
///
/// Within the UTF-16 and UTF-32 families the detected byte order stays
/// authoritative (a BOM beats the label); across families nothing is
/// compatible except ASCII supersets among themselves.
pub fn compatible_family(detected: &str, declared: &str) -> bool {
    family(detected) == family(declared)
}

/// Whether a declaration naming `declared` requires swapping converters, as
/// opposed to keeping the detected one.
pub fn should_switch(detected: &str, declared: &str) -> bool {
    match family(detected) {
        Family::AsciiCompatible => !declared.eq_ignore_ascii_case(detected),
        // Byte order came from the BOM or the bit pattern; the label cannot
        // override it.
        Family::Utf16 | Family::Utf32 => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn boms_detected_longest_first() {
        assert_eq!(
            detect_encoding(&[0x00, 0x00, 0xFE, 0xFF]),
            Some(Detected {
                label: "utf-32be",
                bom_len: 4
            })
        );
        assert_eq!(
            detect_encoding(&[0xFF, 0xFE, 0x00, 0x00]),
            Some(Detected {
                label: "utf-32le",
                bom_len: 4
            })
        );
        // Same two lead bytes without the zero tail: UTF-16.
        assert_eq!(
            detect_encoding(&[0xFF, 0xFE, 0x3C, 0x00]),
            Some(Detected {
                label: "utf-16le",
                bom_len: 2
            })
        );
        assert_eq!(
            detect_encoding(&[0xEF, 0xBB, 0xBF, b'<']),
            Some(Detected {
                label: "utf-8",
                bom_len: 3
            })
        );
    }

    #[test]
    fn bomless_patterns() {
        assert_eq!(
            detect_encoding(&[0x00, b'<', 0x00, b'?']),
            Some(Detected {
                label: "utf-16be",
                bom_len: 0
            })
        );
        assert_eq!(
            detect_encoding(b"<?xml version"),
            Some(Detected {
                label: "utf-8",
                bom_len: 0
            })
        );
        assert_eq!(detect_encoding(b"<r/>"), None);
        assert_eq!(detect_encoding(b""), None);
    }

    #[test]
    fn family_compatibility() {
        assert!(compatible_family("utf-16le", "UTF-16"));
        assert!(compatible_family("utf-8", "ISO-8859-1"));
        assert!(!compatible_family("utf-16be", "utf-8"));
        assert!(!compatible_family("utf-8", "utf-32le"));

        assert!(should_switch("utf-8", "windows-1251"));
        assert!(!should_switch("utf-8", "UTF-8"));
        assert!(!should_switch("utf-16le", "utf-16"));
    }
}
