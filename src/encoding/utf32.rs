//! UTF-32 converters. `encoding_rs` does not ship UTF-32, but XML encoding
//! autodetection has to recognize it, so both byte orders are implemented
//! here against the same converter contract.

use super::{CodeConverter, DecodeStatus, DecodeStep};

/// Decodes UTF-32 in either byte order, four bytes per code point.
///
/// Values above U+10FFFF and surrogate code points are malformed. A partial
/// trailing unit is carried across calls and becomes malformed at end of
/// input.
pub struct Utf32Converter {
    big_endian: bool,
    pending: [u8; 4],
    pending_len: u8,
}

impl Utf32Converter {
    pub fn big_endian() -> Self {
        Utf32Converter {
            big_endian: true,
            pending: [0; 4],
            pending_len: 0,
        }
    }

    pub fn little_endian() -> Self {
        Utf32Converter {
            big_endian: false,
            pending: [0; 4],
            pending_len: 0,
        }
    }

    #[inline]
    fn unit(&self, bytes: [u8; 4]) -> u32 {
        if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }
}

impl CodeConverter for Utf32Converter {
    fn name(&self) -> &'static str {
        if self.big_endian {
            "UTF-32BE"
        } else {
            "UTF-32LE"
        }
    }

    fn decode(&mut self, input: &[u8], last: bool, output: &mut String) -> DecodeStep {
        let mut bytes_read = 0;
        let mut chars_written = 0;

        while bytes_read < input.len() || (last && self.pending_len > 0) {
            while self.pending_len < 4 && bytes_read < input.len() {
                self.pending[self.pending_len as usize] = input[bytes_read];
                self.pending_len += 1;
                bytes_read += 1;
            }
            if self.pending_len < 4 {
                if last {
                    let len = self.pending_len;
                    self.pending_len = 0;
                    return DecodeStep {
                        bytes_read,
                        chars_written,
                        status: DecodeStatus::Malformed(len),
                    };
                }
                break;
            }
            let value = self.unit(self.pending);
            self.pending_len = 0;
            match char::from_u32(value) {
                Some(c) => {
                    output.push(c);
                    chars_written += 1;
                }
                None => {
                    return DecodeStep {
                        bytes_read,
                        chars_written,
                        status: DecodeStatus::Malformed(4),
                    };
                }
            }
        }

        DecodeStep {
            bytes_read,
            chars_written,
            status: if last {
                DecodeStatus::Done
            } else {
                DecodeStatus::InputEmpty
            },
        }
    }
}
