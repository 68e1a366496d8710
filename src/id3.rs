// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ID3v2.3 and ID3v2.4 tag regions at the head of MP3 files
//!
//! An ID3v2 tag is a 10 byte header followed by a run of frames and
//! optional zero padding:
//!
//! | Bytes | Field | Meaning |
//! |------:|------:|---------|
//! | 3     | magic | `ID3` |
//! | 1     | major | `3` or `4` handled here |
//! | 1     | revision | ignored |
//! | 1     | flags | bit 6 marks an extended header |
//! | 4     | size | synchsafe, tag bytes after the header |
//!
//! Each frame is a 4 byte ASCII id, a 4 byte size (synchsafe in v2.4,
//! plain big-endian in v2.3, the main incompatibility between the two
//! versions), 2 flag bytes, then the payload.  Reading never fails:
//! malformed frames end iteration and whatever was decoded before them
//! stands.

use crate::Error;
use crate::cursor::{Cursor, TextEncoding};
use crate::lrc::LyricLine;
use crate::tag::{CoverImage, TagUpdate};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Frame ids handled by this codec
///
/// All other frames are carried over untouched when a tag is rewritten.
pub mod ids {
    /// Track title text frame
    pub const TITLE: [u8; 4] = *b"TIT2";

    /// Lead artist text frame
    pub const ARTIST: [u8; 4] = *b"TPE1";

    /// Album name text frame
    pub const ALBUM: [u8; 4] = *b"TALB";

    /// Unsynchronized (plain text) lyrics frame
    pub const LYRICS: [u8; 4] = *b"USLT";

    /// Synchronized (timed) lyrics frame
    pub const SYNCED_LYRICS: [u8; 4] = *b"SYLT";

    /// Attached picture frame
    pub const PICTURE: [u8; 4] = *b"APIC";
}

const MAGIC: &[u8; 3] = b"ID3";

/// Largest value a 4-byte synchsafe integer can carry
const SYNCHSAFE_MAX: u32 = (1 << 28) - 1;

/// A parsed ID3v2 tag header
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TagHeader {
    /// Major version, 3 or 4
    pub major: u8,
    /// Revision number, ignored
    pub revision: u8,
    /// Header flags
    pub flags: u8,
    /// Tag size in bytes, not counting this header
    pub size: u32,
}

impl TagHeader {
    /// Serialized header length in bytes
    pub const LEN: usize = 10;

    /// Parses the header at the start of `bytes`, if one is there
    ///
    /// Returns `None` on missing magic or a major version other than
    /// 3 or 4.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut c = Cursor::new(bytes);

        if c.bytes(3)? != MAGIC {
            return None;
        }

        let header = Self {
            major: c.u8()?,
            revision: c.u8()?,
            flags: c.u8()?,
            size: c.synchsafe()?,
        };

        matches!(header.major, 3 | 4).then_some(header)
    }

    /// Whether the extended header flag is set
    pub fn extended(&self) -> bool {
        self.flags & 0x40 != 0
    }
}

/// Returns the tag body following the header
///
/// A size field pointing past the end of the buffer is clipped to
/// whatever is actually present, so truncated files degrade instead
/// of failing.
pub fn tag_body<'a>(bytes: &'a [u8], header: &TagHeader) -> &'a [u8] {
    let end = TagHeader::LEN
        .saturating_add(header.size as usize)
        .min(bytes.len());

    bytes.get(TagHeader::LEN..end).unwrap_or_default()
}

/// Skips past the extended header, if the tag has one
///
/// The extended header's own size field is synchsafe and includes
/// itself in v2.4, but plain big-endian and exclusive of itself in
/// v2.3.  Getting this switch wrong walks the frame list from the
/// wrong offset, which is the classic v2.3/v2.4 incompatibility.
pub fn frame_region<'a>(body: &'a [u8], header: &TagHeader) -> &'a [u8] {
    if !header.extended() {
        return body;
    }

    let mut c = Cursor::new(body);
    let skip = match header.major {
        4 => c.synchsafe().and_then(|size| (size as usize).checked_sub(4)),
        _ => c.u32_be().map(|size| size as usize),
    };

    match skip.and_then(|size| c.skip(size)) {
        Some(()) => c.rest(),
        None => {
            warn!("extended header larger than tag, no frames readable");
            &[]
        }
    }
}

/// One raw frame within a tag
#[derive(Copy, Clone, Debug)]
pub struct Frame<'a> {
    /// Frame id, e.g. `TIT2`
    pub id: [u8; 4],
    /// Format/status flags, carried but not interpreted
    pub flags: [u8; 2],
    /// Frame payload
    pub data: &'a [u8],
}

/// An iterator over the frames of a tag region
///
/// Iteration ends, without error, at an all-zero frame id (the padding
/// region), a zero frame size, or a size running past the end of the
/// region.
pub struct Frames<'a> {
    cursor: Cursor<'a>,
    major: u8,
    done: bool,
}

impl<'a> Frames<'a> {
    /// Iterates frames of the given region, already past any
    /// extended header
    pub fn new(region: &'a [u8], major: u8) -> Self {
        Self {
            cursor: Cursor::new(region),
            major,
            done: false,
        }
    }

    fn next_frame(&mut self) -> Option<Frame<'a>> {
        let id: [u8; 4] = self.cursor.bytes(4)?.try_into().ok()?;
        if id == [0; 4] {
            // zero id marks the start of the padding region
            return None;
        }

        let size = match self.major {
            4 => self.cursor.synchsafe()?,
            _ => self.cursor.u32_be()?,
        };
        if size == 0 {
            return None;
        }

        let flags: [u8; 2] = self.cursor.bytes(2)?.try_into().ok()?;
        let data = self.cursor.bytes(size as usize)?;

        Some(Frame { id, flags, data })
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Frame<'a>> {
        if self.done {
            None
        } else {
            let frame = self.next_frame();
            self.done = frame.is_none();
            frame
        }
    }
}

/// Decodes a text frame payload (encoding byte plus encoded text)
///
/// Multi-value v2.4 payloads yield their first value, which is where
/// a NUL-terminated read naturally stops.
pub fn text_frame(data: &[u8]) -> Option<String> {
    let mut c = Cursor::new(data);
    let encoding = TextEncoding::from_id3(c.u8()?)?;
    let text = encoding.decode(c.terminated(encoding.nul_width()));
    crate::cursor::normalize(&text)
}

/// Decodes a USLT frame payload into its lyric text
///
/// | Bytes | Field |
/// |------:|-------|
/// | 1 | text encoding |
/// | 3 | language code |
/// | .. | content descriptor, NUL terminated |
/// | .. | lyric text |
pub fn uslt_text(data: &[u8]) -> Option<String> {
    let mut c = Cursor::new(data);
    let encoding = TextEncoding::from_id3(c.u8()?)?;
    c.skip(3)?;
    let _descriptor = c.terminated(encoding.nul_width());

    let text = encoding.decode(c.rest());
    (!text.trim().is_empty()).then_some(text)
}

/// Decodes a SYLT frame payload into timed lyric lines
///
/// | Bytes | Field |
/// |------:|-------|
/// | 1 | text encoding |
/// | 3 | language code |
/// | 1 | timestamp format |
/// | 1 | content type |
/// | .. | content descriptor, NUL terminated |
/// | .. | (NUL terminated text, 4-byte big-endian timestamp) pairs |
///
/// Timestamp format 2 is milliseconds.  Format 1 (MPEG frame counts)
/// is read as milliseconds as well; converting frame counts would need
/// the audio stream's frame duration, which this codec never decodes,
/// so such files come back with proportional rather than absolute
/// times.  Entries are sorted by time on the way out.
pub fn sylt_lines(data: &[u8]) -> Option<Vec<LyricLine>> {
    let mut c = Cursor::new(data);
    let encoding = TextEncoding::from_id3(c.u8()?)?;
    c.skip(3)?;
    let _timestamp_format = c.u8()?;
    let _content_type = c.u8()?;
    let _descriptor = c.terminated(encoding.nul_width());

    let mut lines = Vec::new();
    while !c.is_empty() {
        let text = encoding.decode(c.terminated(encoding.nul_width()));
        let Some(millis) = c.u32_be() else {
            // trailing partial pair, keep what we have
            break;
        };

        let text = text.trim();
        if !text.is_empty() {
            lines.push(LyricLine {
                time: f64::from(millis) / 1000.0,
                text: text.to_owned(),
            });
        }
    }

    lines.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
    (!lines.is_empty()).then_some(lines)
}

/// Decodes an APIC frame payload into its image
///
/// | Bytes | Field |
/// |------:|-------|
/// | 1 | text encoding (applies to the description only) |
/// | .. | MIME type, Latin-1, NUL terminated |
/// | 1 | picture type |
/// | .. | description, NUL terminated |
/// | .. | image data |
pub fn apic(data: &[u8]) -> Option<CoverImage> {
    let mut c = Cursor::new(data);
    let encoding = TextEncoding::from_id3(c.u8()?)?;
    let media_type = TextEncoding::Latin1.decode(c.terminated(1));
    let _picture_type = c.u8()?;
    let _description = c.terminated(encoding.nul_width());

    let image = c.rest();
    (!image.is_empty()).then(|| CoverImage {
        media_type: match media_type.trim() {
            "" => "image/jpeg".to_owned(),
            mime => mime.to_owned(),
        },
        data: image.to_vec(),
    })
}

/// Rebuilds a tag's frame run, replacing the frames the update names
///
/// Frames for fields present in `update` are dropped and re-rendered
/// from the new values; every other frame is carried over byte for
/// byte.  Text is encoded UTF-8 under v2.4 and UTF-16 with a byte
/// order mark under v2.3, which has no UTF-8 encoding value.
pub fn rebuild_frames(major: u8, region: &[u8], update: &TagUpdate) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();

    for frame in Frames::new(region, major) {
        if replaces(update, frame.id) {
            debug!(
                "dropping {} frame for replacement",
                String::from_utf8_lossy(&frame.id)
            );
        } else {
            render_frame(&mut out, major, frame.id, frame.flags, frame.data)?;
        }
    }

    let text_fields = [
        (ids::TITLE, &update.title),
        (ids::ARTIST, &update.artist),
        (ids::ALBUM, &update.album),
    ];

    for (id, value) in text_fields {
        if let Some(value) = value {
            render_frame(&mut out, major, id, [0; 2], &text_payload(major, value))?;
        }
    }

    if let Some(lyrics) = &update.lyrics {
        render_frame(&mut out, major, ids::LYRICS, [0; 2], &uslt_payload(major, lyrics))?;
    }

    if let Some(cover) = &update.cover {
        render_frame(&mut out, major, ids::PICTURE, [0; 2], &apic_payload(major, cover))?;
    }

    Ok(out)
}

/// Renders a tag header for a rebuilt tag of the given body length
pub fn render_header(major: u8, body_len: usize) -> Result<[u8; TagHeader::LEN], Error> {
    let size = u32::try_from(body_len)
        .ok()
        .filter(|size| *size <= SYNCHSAFE_MAX)
        .ok_or(Error::ExcessiveTagSize)?;

    let mut header = [0; TagHeader::LEN];
    header[..3].copy_from_slice(MAGIC);
    header[3] = major;
    // revision 0, flags cleared: any extended header was dropped
    header[6..].copy_from_slice(&synchsafe_bytes(size));
    Ok(header)
}

fn replaces(update: &TagUpdate, id: [u8; 4]) -> bool {
    match id {
        ids::TITLE => update.title.is_some(),
        ids::ARTIST => update.artist.is_some(),
        ids::ALBUM => update.album.is_some(),
        ids::LYRICS => update.lyrics.is_some(),
        ids::PICTURE => update.cover.is_some(),
        _ => false,
    }
}

fn render_frame(
    out: &mut Vec<u8>,
    major: u8,
    id: [u8; 4],
    flags: [u8; 2],
    payload: &[u8],
) -> Result<(), Error> {
    let size = u32::try_from(payload.len())
        .ok()
        .filter(|size| *size <= SYNCHSAFE_MAX)
        .ok_or(Error::ExcessiveTagSize)?;

    out.extend_from_slice(&id);
    out.extend_from_slice(&match major {
        4 => synchsafe_bytes(size),
        _ => size.to_be_bytes(),
    });
    out.extend_from_slice(&flags);
    out.extend_from_slice(payload);
    Ok(())
}

fn synchsafe_bytes(value: u32) -> [u8; 4] {
    [
        (value >> 21) as u8 & 0x7F,
        (value >> 14) as u8 & 0x7F,
        (value >> 7) as u8 & 0x7F,
        value as u8 & 0x7F,
    ]
}

/// Encodes text in the best encoding the tag version supports
fn encoded(major: u8, text: &str) -> (u8, Vec<u8>) {
    match major {
        4 => (3, text.as_bytes().to_vec()),
        _ => (1, utf16_bytes(text)),
    }
}

fn utf16_bytes(text: &str) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFE];
    out.extend(text.encode_utf16().flat_map(|unit| unit.to_le_bytes()));
    out
}

fn nul(encoding_byte: u8) -> &'static [u8] {
    match encoding_byte {
        1 | 2 => &[0, 0],
        _ => &[0],
    }
}

fn text_payload(major: u8, text: &str) -> Vec<u8> {
    let (encoding, bytes) = encoded(major, text);
    let mut payload = vec![encoding];
    payload.extend_from_slice(&bytes);
    payload
}

fn uslt_payload(major: u8, lyrics: &str) -> Vec<u8> {
    let (encoding, bytes) = encoded(major, lyrics);
    let (_, descriptor) = encoded(major, "");

    let mut payload = vec![encoding];
    payload.extend_from_slice(b"eng");
    payload.extend_from_slice(&descriptor);
    payload.extend_from_slice(nul(encoding));
    payload.extend_from_slice(&bytes);
    payload
}

fn apic_payload(major: u8, cover: &CoverImage) -> Vec<u8> {
    const FRONT_COVER: u8 = 3;

    let (encoding, description) = encoded(major, "Cover");

    let mut payload = vec![encoding];
    payload.extend_from_slice(cover.media_type.as_bytes());
    payload.push(0);
    payload.push(FRONT_COVER);
    payload.extend_from_slice(&description);
    payload.extend_from_slice(nul(encoding));
    payload.extend_from_slice(&cover.data);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_header(size: u32) -> Vec<u8> {
        let mut tag = b"ID3\x04\x00\x00".to_vec();
        tag.extend_from_slice(&synchsafe_bytes(size));
        tag
    }

    #[test]
    fn header_rejects_other_majors() {
        assert!(TagHeader::parse(b"ID3\x02\x00\x00\x00\x00\x00\x00").is_none());
        assert!(TagHeader::parse(b"ID3\x05\x00\x00\x00\x00\x00\x00").is_none());
        assert!(TagHeader::parse(b"XXX\x04\x00\x00\x00\x00\x00\x00").is_none());
    }

    #[test]
    fn body_is_clipped_to_buffer() {
        // declared size much larger than the actual file
        let mut tag = v4_header(1000);
        tag.extend_from_slice(&[0xAA; 5]);

        let header = TagHeader::parse(&tag).unwrap();
        assert_eq!(tag_body(&tag, &header), &[0xAA; 5]);
    }

    #[test]
    fn extended_header_skip_v3() {
        // v2.3 size excludes the size field itself
        let mut body = 6u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0; 6]);
        body.extend_from_slice(b"rest");

        let header = TagHeader {
            major: 3,
            revision: 0,
            flags: 0x40,
            size: 0,
        };
        assert_eq!(frame_region(&body, &header), b"rest");
    }

    #[test]
    fn extended_header_skip_v4() {
        // v2.4 size is synchsafe and includes the size field
        let mut body = synchsafe_bytes(6).to_vec();
        body.extend_from_slice(&[0; 2]);
        body.extend_from_slice(b"rest");

        let header = TagHeader {
            major: 4,
            revision: 0,
            flags: 0x40,
            size: 0,
        };
        assert_eq!(frame_region(&body, &header), b"rest");
    }

    #[test]
    fn iteration_stops_at_padding() {
        let mut region = Vec::new();
        render_frame(&mut region, 4, ids::TITLE, [0; 2], &text_payload(4, "T")).unwrap();
        region.extend_from_slice(&[0; 64]);

        let frames: Vec<_> = Frames::new(&region, 4).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, ids::TITLE);
    }

    #[test]
    fn iteration_stops_on_oversized_frame() {
        let mut region = Vec::new();
        render_frame(&mut region, 4, ids::TITLE, [0; 2], &text_payload(4, "T")).unwrap();
        // frame claiming far more data than remains
        region.extend_from_slice(b"TALB");
        region.extend_from_slice(&synchsafe_bytes(10_000));
        region.extend_from_slice(&[0; 2]);
        region.extend_from_slice(b"short");

        let frames: Vec<_> = Frames::new(&region, 4).collect();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn v3_text_roundtrips_through_utf16() {
        let payload = text_payload(3, "Füür");
        assert_eq!(payload[0], 1);
        assert_eq!(text_frame(&payload), Some("Füür".to_owned()));
    }

    #[test]
    fn v4_text_roundtrips_through_utf8() {
        let payload = text_payload(4, "Füür");
        assert_eq!(payload[0], 3);
        assert_eq!(text_frame(&payload), Some("Füür".to_owned()));
    }

    #[test]
    fn sylt_entries_are_sorted() {
        let mut data = vec![3];
        data.extend_from_slice(b"eng");
        data.push(2); // millisecond format
        data.push(1); // lyrics content
        data.push(0); // empty descriptor
        for (text, ms) in [("later", 9_000u32), ("sooner", 1_000)] {
            data.extend_from_slice(text.as_bytes());
            data.push(0);
            data.extend_from_slice(&ms.to_be_bytes());
        }

        let lines = sylt_lines(&data).unwrap();
        assert_eq!(lines[0].text, "sooner");
        assert_eq!(lines[0].time, 1.0);
        assert_eq!(lines[1].text, "later");
        assert_eq!(lines[1].time, 9.0);
    }

    #[test]
    fn apic_roundtrip() {
        let cover = CoverImage {
            media_type: "image/png".to_owned(),
            data: vec![1, 2, 3],
        };

        let decoded = apic(&apic_payload(4, &cover)).unwrap();
        assert_eq!(decoded.media_type, "image/png");
        assert_eq!(decoded.data, vec![1, 2, 3]);
    }
}
