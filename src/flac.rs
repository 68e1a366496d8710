// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! FLAC metadata blocks between the stream marker and the audio frames
//!
//! A FLAC file opens with the `fLaC` marker followed by one or more
//! metadata blocks, each led by a 4 byte header:
//!
//! | Bits | Field | Meaning |
//! |-----:|-------|---------|
//! | 1    | last  | set on the final block before the audio |
//! | 7    | type  | block type |
//! | 24   | size  | block length in bytes, not counting this header |
//!
//! Only `VORBIS_COMMENT` and `PICTURE` blocks are decoded.  All other
//! blocks, known or not, ride along as raw bytes so a rewritten file
//! keeps its `STREAMINFO`, seek tables and application blocks intact.
//!
//! Unusually for FLAC, the `VORBIS_COMMENT` block interior is little
//! endian, a holdover from the Vorbis spec it was lifted from.  The
//! `PICTURE` block is big endian like the rest of the format.

use crate::Error;
use bitstream_io::{
    BigEndian, BitRead, BitReader, BitWrite, BitWriter, FromBitStream, LittleEndian, ToBitStream,
};
use std::fmt::Display;
use tracing::warn;

/// Stream marker at the very start of every FLAC file
pub const FLAC_TAG: &[u8; 4] = b"fLaC";

/// `STREAMINFO` block type, always the first block
pub const STREAMINFO: u8 = 0;

/// `PADDING` block type
pub const PADDING: u8 = 1;

/// `VORBIS_COMMENT` block type
pub const VORBIS_COMMENT: u8 = 4;

/// `PICTURE` block type
pub const PICTURE: u8 = 6;

/// Largest payload a block's 24-bit size field can describe
const MAX_BLOCK_LEN: u32 = (1 << 24) - 1;

/// A metadata block header
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Whether this is the final block before the audio frames
    pub last: bool,
    /// Block type
    pub block_type: u8,
    /// Block length in bytes, not counting the header
    pub size: u32,
}

impl FromBitStream for BlockHeader {
    type Error = std::io::Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        Ok(Self {
            last: r.read::<1, u8>()? == 1,
            block_type: r.read::<7, u8>()?,
            size: r.read::<24, u32>()?,
        })
    }
}

impl ToBitStream for BlockHeader {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write::<1, u8>(u8::from(self.last))?;
        w.write::<7, u8>(self.block_type)?;
        w.write::<24, u32>(self.size)
    }
}

/// A metadata block carried as undecoded bytes
///
/// The `last` bit is not stored; it is recalculated from block
/// position whenever a run of blocks is written back out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawBlock {
    /// Block type
    pub block_type: u8,
    /// Block payload
    pub data: Vec<u8>,
}

impl RawBlock {
    /// Serializes a decoded block into raw form
    pub fn build<T: ToBitStream<Error = Error>>(block_type: u8, block: &T) -> Result<Self, Error> {
        let mut data = Vec::new();
        BitWriter::endian(&mut data, BigEndian).build(block)?;

        if data.len() > MAX_BLOCK_LEN as usize {
            return Err(Error::InvalidBlockSize);
        }

        Ok(Self { block_type, data })
    }

    /// Decodes the block payload into the given type
    pub fn decode<T: FromBitStream<Error = Error>>(&self) -> Result<T, Error> {
        BitReader::endian(self.data.as_slice(), BigEndian).parse()
    }
}

/// Reads all metadata blocks from the start of a FLAC file
///
/// On success the reader is positioned at the first audio frame,
/// so the remainder can be copied verbatim when rewriting a file.
/// Any malformed block is an error; this is the strict reader the
/// write path depends on.
pub fn read_blocks<R: std::io::Read + ?Sized>(r: &mut R) -> Result<Vec<RawBlock>, Error> {
    let mut r = BitReader::endian(r, BigEndian);

    let mut tag = [0; 4];
    r.read_bytes(&mut tag)?;
    if &tag != FLAC_TAG {
        return Err(Error::MissingFlacTag);
    }

    let mut blocks = Vec::new();
    loop {
        let header = r.parse::<BlockHeader>()?;
        blocks.push(RawBlock {
            block_type: header.block_type,
            data: r.read_to_vec(header.size as usize)?,
        });

        if header.last {
            return Ok(blocks);
        }
    }
}

/// Scans as many metadata blocks as a buffer yields
///
/// The lossy counterpart of [`read_blocks`] used when extracting
/// display metadata, where a truncated or damaged file should still
/// give up whatever blocks precede the damage.
pub fn scan_blocks(bytes: &[u8]) -> Vec<RawBlock> {
    let mut c = crate::cursor::Cursor::new(bytes);
    let mut blocks = Vec::new();

    if c.bytes(4).is_none_or(|tag| tag != FLAC_TAG) {
        return blocks;
    }

    loop {
        let header = c.u8().map(|byte| (byte & 0x80 != 0, byte & 0x7F));
        let size = c.u24_be();

        let data = match (header, size) {
            (Some(_), Some(size)) => c.bytes(size as usize),
            _ => None,
        };

        match (header, data) {
            (Some((last, block_type)), Some(data)) => {
                blocks.push(RawBlock {
                    block_type,
                    data: data.to_vec(),
                });
                if last {
                    return blocks;
                }
            }
            _ => {
                warn!("metadata blocks truncated after {} blocks", blocks.len());
                return blocks;
            }
        }
    }
}

/// Writes the stream marker and a run of metadata blocks
///
/// The final block in the slice gets the `last` bit.  An empty slice
/// is rejected since a FLAC file requires at least a `STREAMINFO`.
pub fn write_blocks<W: std::io::Write>(w: &mut W, blocks: &[RawBlock]) -> Result<(), Error> {
    if blocks.is_empty() {
        return Err(Error::MissingStreaminfo);
    }

    let mut w = BitWriter::endian(w, BigEndian);
    w.write_bytes(FLAC_TAG)?;

    let mut blocks = blocks.iter().peekable();
    while let Some(block) = blocks.next() {
        let size = u32::try_from(block.data.len())
            .ok()
            .filter(|size| *size <= MAX_BLOCK_LEN)
            .ok_or(Error::InvalidBlockSize)?;

        w.build(&BlockHeader {
            last: blocks.peek().is_none(),
            block_type: block.block_type,
            size,
        })?;
        w.write_bytes(&block.data)?;
    }

    Ok(())
}

/// Comment field names handled by this codec
pub mod fields {
    /// Track title
    pub const TITLE: &str = "TITLE";

    /// Track artist
    pub const ARTIST: &str = "ARTIST";

    /// Album name
    pub const ALBUM: &str = "ALBUM";

    /// Lyrics, the conventional field
    pub const LYRICS: &str = "LYRICS";

    /// Lyrics, as some taggers write them
    pub const UNSYNCEDLYRICS: &str = "UNSYNCEDLYRICS";

    /// Lyrics, singular variant
    pub const LYRIC: &str = "LYRIC";

    /// Timed lyrics
    pub const SYNCEDLYRICS: &str = "SYNCEDLYRICS";

    /// Timed lyrics, long variant
    pub const SYNCHRONIZEDLYRICS: &str = "SYNCHRONIZEDLYRICS";

    /// Free-form comment, sometimes holding lyrics
    pub const COMMENT: &str = "COMMENT";

    /// Free-form description, sometimes holding lyrics
    pub const DESCRIPTION: &str = "DESCRIPTION";
}

/// A `VORBIS_COMMENT` block
///
/// Fields are stored as `NAME=value` strings.  Names are matched
/// case-insensitively, values are returned as-is.
///
/// # Example
///
/// ```
/// use tag_codec::flac::{VorbisComment, fields};
///
/// let mut comment = VorbisComment::default();
/// comment.set(fields::TITLE, "Test Track");
///
/// assert_eq!(comment.get(fields::TITLE), Some("Test Track"));
/// assert_eq!(comment.get("title"), Some("Test Track"));
/// assert_eq!(comment.get(fields::ARTIST), None);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VorbisComment {
    /// Vendor string of whatever wrote the block
    pub vendor_string: String,
    /// All `NAME=value` fields in file order
    pub fields: Vec<String>,
}

impl Default for VorbisComment {
    fn default() -> Self {
        Self {
            vendor_string: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
                .to_owned(),
            fields: Vec::new(),
        }
    }
}

impl VorbisComment {
    /// Returns the first value for the given field, if any
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(name, _)| name.eq_ignore_ascii_case(field))
                .map(|(_, value)| value)
        })
    }

    /// Replaces all values of the given field with a single new one
    ///
    /// # Panics
    ///
    /// Panics if `field` contains an `=` character
    pub fn set<V: Display>(&mut self, field: &str, value: V) {
        assert!(!field.contains('='), "field names must not contain '='");

        self.remove(field);
        self.fields.push(format!("{field}={value}"));
    }

    /// Removes all values of the given field
    pub fn remove(&mut self, field: &str) {
        self.fields.retain(|entry| {
            !entry
                .split_once('=')
                .is_some_and(|(name, _)| name.eq_ignore_ascii_case(field))
        });
    }
}

impl FromBitStream for VorbisComment {
    type Error = Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        fn read_len<R: BitRead + ?Sized>(r: &mut R) -> Result<usize, Error> {
            let size = r.read_as_to::<LittleEndian, u32>()?;
            (size <= MAX_BLOCK_LEN)
                .then_some(size as usize)
                .ok_or(Error::InvalidBlockSize)
        }

        let vendor_len = read_len(r)?;
        let vendor_string = String::from_utf8_lossy(&r.read_to_vec(vendor_len)?).into_owned();

        let count = read_len(r)?;
        let mut fields = Vec::new();
        for _ in 0..count {
            let len = read_len(r)?;
            match String::from_utf8(r.read_to_vec(len)?) {
                Ok(field) => fields.push(field),
                Err(_) => warn!("skipping comment field with invalid UTF-8"),
            }
        }

        Ok(Self {
            vendor_string,
            fields,
        })
    }
}

impl ToBitStream for VorbisComment {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        fn write_string<W: BitWrite + ?Sized>(w: &mut W, s: &str) -> Result<(), Error> {
            w.write_as_from::<LittleEndian, u32>(
                s.len().try_into().map_err(|_| Error::ExcessiveStringLength)?,
            )?;
            w.write_bytes(s.as_bytes()).map_err(Error::Io)
        }

        write_string(w, &self.vendor_string)?;

        w.write_as_from::<LittleEndian, u32>(
            self.fields
                .len()
                .try_into()
                .map_err(|_| Error::ExcessiveVorbisEntries)?,
        )?;

        self.fields
            .iter()
            .try_for_each(|field| write_string(w, field))
    }
}

/// A `PICTURE` block
///
/// | Bytes | Field |
/// |------:|-------|
/// | 4 | picture type |
/// | 4 + .. | MIME type, length prefixed |
/// | 4 + .. | description, length prefixed |
/// | 4 | width in pixels |
/// | 4 | height in pixels |
/// | 4 | color depth in bits |
/// | 4 | indexed colors used |
/// | 4 + .. | image data, length prefixed |
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Picture {
    /// Picture type, 3 for a front cover
    pub picture_type: u32,
    /// MIME type of the image data
    pub media_type: String,
    /// Description of the image
    pub description: String,
    /// Width in pixels, 0 if unknown
    pub width: u32,
    /// Height in pixels, 0 if unknown
    pub height: u32,
    /// Color depth in bits per pixel, 0 if unknown
    pub color_depth: u32,
    /// Indexed colors used, 0 for non-indexed images
    pub colors_used: u32,
    /// Raw image data
    pub data: Vec<u8>,
}

impl Picture {
    /// Front cover picture type
    pub const FRONT_COVER: u32 = 3;

    /// Builds a front cover picture around raw image data
    ///
    /// The dimension fields are left at 0, which the format permits
    /// for writers that do not decode the image itself.
    pub fn front_cover(media_type: String, data: Vec<u8>) -> Self {
        Self {
            picture_type: Self::FRONT_COVER,
            media_type,
            description: String::new(),
            width: 0,
            height: 0,
            color_depth: 0,
            colors_used: 0,
            data,
        }
    }
}

impl FromBitStream for Picture {
    type Error = Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        fn prefixed_field<R: BitRead + ?Sized>(r: &mut R) -> Result<Vec<u8>, Error> {
            let size = r.read_to::<u32>()?;
            (size <= MAX_BLOCK_LEN)
                .then_some(size as usize)
                .ok_or(Error::InvalidBlockSize)
                .and_then(|size| r.read_to_vec(size).map_err(Error::Io))
        }

        Ok(Self {
            picture_type: r.read_to()?,
            media_type: String::from_utf8_lossy(&prefixed_field(r)?).into_owned(),
            description: String::from_utf8_lossy(&prefixed_field(r)?).into_owned(),
            width: r.read_to()?,
            height: r.read_to()?,
            color_depth: r.read_to()?,
            colors_used: r.read_to()?,
            data: prefixed_field(r)?,
        })
    }
}

impl ToBitStream for Picture {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        fn prefixed_field<W: BitWrite + ?Sized>(w: &mut W, bytes: &[u8]) -> Result<(), Error> {
            w.write_from::<u32>(
                bytes
                    .len()
                    .try_into()
                    .map_err(|_| Error::ExcessiveStringLength)?,
            )?;
            w.write_bytes(bytes).map_err(Error::Io)
        }

        w.write_from::<u32>(self.picture_type)?;
        prefixed_field(w, self.media_type.as_bytes())?;
        prefixed_field(w, self.description.as_bytes())?;
        w.write_from::<u32>(self.width)?;
        w.write_from::<u32>(self.height)?;
        w.write_from::<u32>(self.color_depth)?;
        w.write_from::<u32>(self.colors_used)?;
        prefixed_field(w, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaminfo() -> RawBlock {
        RawBlock {
            block_type: STREAMINFO,
            data: vec![0xAB; 34],
        }
    }

    #[test]
    fn blocks_roundtrip() {
        let mut comment = VorbisComment::default();
        comment.set(fields::TITLE, "Roundtrip");

        let blocks = vec![
            streaminfo(),
            RawBlock::build(VORBIS_COMMENT, &comment).unwrap(),
            RawBlock {
                block_type: PADDING,
                data: vec![0; 16],
            },
        ];

        let mut bytes = Vec::new();
        write_blocks(&mut bytes, &blocks).unwrap();

        let read = read_blocks(&mut bytes.as_slice()).unwrap();
        assert_eq!(read, blocks);
        assert_eq!(
            read[1].decode::<VorbisComment>().unwrap().get("TITLE"),
            Some("Roundtrip")
        );
    }

    #[test]
    fn missing_marker_is_an_error() {
        assert!(matches!(
            read_blocks(&mut &b"OggS\x00\x00\x00\x00"[..]),
            Err(Error::MissingFlacTag)
        ));
        assert!(scan_blocks(b"OggS\x00\x00\x00\x00").is_empty());
    }

    #[test]
    fn scan_keeps_blocks_before_damage() {
        let mut bytes = Vec::new();
        write_blocks(&mut bytes, &[streaminfo()]).unwrap();
        // a second block header promising data that is not there
        bytes[4] &= 0x7F;
        bytes.extend_from_slice(&[0x04, 0x00, 0x10, 0x00, 0xAA]);

        let blocks = scan_blocks(&bytes);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, STREAMINFO);
    }

    #[test]
    fn comment_set_replaces_all_values() {
        let mut comment = VorbisComment {
            vendor_string: String::new(),
            fields: vec![
                "TITLE=one".to_owned(),
                "Title=two".to_owned(),
                "ARTIST=kept".to_owned(),
            ],
        };

        comment.set("TITLE", "three");
        assert_eq!(comment.get("TITLE"), Some("three"));
        assert_eq!(comment.get("ARTIST"), Some("kept"));
        assert_eq!(comment.fields.len(), 2);
    }

    #[test]
    fn comment_skips_invalid_utf8_fields() {
        let mut comment = VorbisComment::default();
        comment.set("ARTIST", "kept");
        let block = RawBlock::build(VORBIS_COMMENT, &comment).unwrap();

        // splice in a second, invalid field ahead of the real one
        let mut data = Vec::new();
        let vendor_end = 4 + comment.vendor_string.len();
        data.extend_from_slice(&block.data[..vendor_end]);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFE, 0xFD]);
        data.extend_from_slice(&block.data[vendor_end + 4..]);

        let decoded = RawBlock {
            block_type: VORBIS_COMMENT,
            data,
        }
        .decode::<VorbisComment>()
        .unwrap();
        assert_eq!(decoded.fields, vec!["ARTIST=kept".to_owned()]);
    }

    #[test]
    fn picture_roundtrip() {
        let picture = Picture::front_cover("image/png".to_owned(), vec![1, 2, 3, 4]);
        let block = RawBlock::build(PICTURE, &picture).unwrap();

        let decoded = block.decode::<Picture>().unwrap();
        assert_eq!(decoded, picture);
        assert_eq!(decoded.picture_type, Picture::FRONT_COVER);
    }
}
