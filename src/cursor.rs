// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bounds-checked reading primitives for byte-aligned container structures
//!
//! Tag regions in real-world files are routinely truncated or padded with
//! garbage, so every accessor returns `Option` and leaves malformed input
//! as a data case rather than a panic or an error to unwind through.

use encoding_rs::{UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

/// A read position over a borrowed byte buffer
///
/// All reads advance the position on success and leave it untouched
/// on failure, so a `None` from one accessor never poisons the next.
///
/// # Example
///
/// ```
/// use tag_codec::cursor::Cursor;
///
/// let mut c = Cursor::new(&[0x00, 0x00, 0x02, 0x01, 0xFF]);
/// assert_eq!(c.synchsafe(), Some(0x101));
/// assert_eq!(c.u8(), Some(0xFF));
/// assert_eq!(c.u8(), None);
/// ```
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the next `len` bytes, if that many remain
    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Advances past `len` bytes, if that many remain
    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.bytes(len).map(|_| ())
    }

    /// Consumes and returns everything left in the buffer
    pub fn rest(&mut self) -> &'a [u8] {
        let tail = &self.buf[self.pos..];
        self.pos = self.buf.len();
        tail
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    pub fn u16_be(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24_be(&mut self) -> Option<u32> {
        self.bytes(3)
            .map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn u32_be(&mut self) -> Option<u32> {
        self.bytes(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_le(&mut self) -> Option<u32> {
        self.bytes(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a 4-byte synchsafe integer
    ///
    /// Only the low 7 bits of each byte carry value.  High bits are
    /// masked off rather than rejected, since some taggers set them
    /// by mistake.
    ///
    /// | Bits | Field |
    /// |-----:|-------|
    /// | 1+7  | bits 27-21 |
    /// | 1+7  | bits 20-14 |
    /// | 1+7  | bits 13-7  |
    /// | 1+7  | bits 6-0   |
    pub fn synchsafe(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| {
            (u32::from(b[0] & 0x7F) << 21)
                | (u32::from(b[1] & 0x7F) << 14)
                | (u32::from(b[2] & 0x7F) << 7)
                | u32::from(b[3] & 0x7F)
        })
    }

    /// Reads up to a NUL terminator of the given character width
    ///
    /// Returns the content bytes and consumes the terminator.
    /// Double-byte terminators are only matched on even offsets
    /// within the remaining region, so UTF-16 code units containing
    /// a zero byte pass through intact.  If no terminator is found,
    /// the whole remaining region is returned.
    pub fn terminated(&mut self, width: usize) -> &'a [u8] {
        let tail = &self.buf[self.pos..];

        if width == 2 {
            let mut i = 0;
            while i + 2 <= tail.len() {
                if tail[i] == 0 && tail[i + 1] == 0 {
                    self.pos += i + 2;
                    return &tail[..i];
                }
                i += 2;
            }
        } else if let Some(i) = tail.iter().position(|b| *b == 0) {
            self.pos += i + 1;
            return &tail[..i];
        }

        self.pos = self.buf.len();
        tail
    }
}

/// A declared ID3v2 text encoding
///
/// | Byte | Encoding |
/// |-----:|----------|
/// | 0    | Latin-1 (decoded as windows-1252, its real-world superset) |
/// | 1    | UTF-16 with byte order mark |
/// | 2    | UTF-16 big-endian, no byte order mark |
/// | 3    | UTF-8 |
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextEncoding {
    Latin1,
    Utf16,
    Utf16Be,
    Utf8,
}

impl TextEncoding {
    /// Maps an ID3v2 encoding byte to an encoding, if defined
    pub fn from_id3(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Latin1),
            1 => Some(Self::Utf16),
            2 => Some(Self::Utf16Be),
            3 => Some(Self::Utf8),
            _ => None,
        }
    }

    /// Width of one code unit, in bytes, for NUL terminator scanning
    pub fn nul_width(self) -> usize {
        match self {
            Self::Latin1 | Self::Utf8 => 1,
            Self::Utf16 | Self::Utf16Be => 2,
        }
    }

    /// Decodes bytes into text, never failing
    ///
    /// Byte order marks are honored and removed, undecodable sequences
    /// become nothing rather than replacement characters, and trailing
    /// NULs are dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use tag_codec::cursor::TextEncoding;
    ///
    /// // 0xE9 is "é" in Latin-1
    /// assert_eq!(TextEncoding::Latin1.decode(b"caf\xE9"), "café");
    ///
    /// // byte-order-marked UTF-16
    /// assert_eq!(TextEncoding::Utf16.decode(b"\xFF\xFEA\x00"), "A");
    /// assert_eq!(TextEncoding::Utf16.decode(b"\xFE\xFF\x00A"), "A");
    /// ```
    pub fn decode(self, bytes: &[u8]) -> String {
        let (text, _, _) = match self {
            Self::Latin1 => WINDOWS_1252.decode(bytes),
            Self::Utf16 => UTF_16LE.decode(bytes),
            Self::Utf16Be => UTF_16BE.decode(bytes),
            Self::Utf8 => UTF_8.decode(bytes),
        };

        text.chars()
            .filter(|c| !matches!(c, '\u{FEFF}' | '\u{FFFD}'))
            .collect::<String>()
            .trim_end_matches('\0')
            .to_owned()
    }
}

/// Cleans up a decoded display field
///
/// Strips control characters and surrounding whitespace, returning
/// `None` when nothing printable remains.
pub fn normalize(text: &str) -> Option<String> {
    let cleaned = text
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();

    let trimmed = cleaned.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
