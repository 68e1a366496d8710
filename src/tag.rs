// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Container-independent tag values and the top-level parse entry point
//!
//! Extraction is deliberately forgiving.  A damaged tag yields the
//! fields that could be decoded rather than an error; only a container
//! that cannot be identified at all refuses to parse.

use crate::cursor::normalize;
use crate::flac::{self, Picture, VorbisComment, fields};
use crate::id3::{self, TagHeader};
use crate::lrc::{self, LyricLine};
use crate::{Error, Format};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tag values extracted from an audio file
///
/// Absent fields stay absent when serialized, so front ends can
/// distinguish "no album" from "empty album".
///
/// # Example
///
/// ```
/// use tag_codec::flac::{RawBlock, VorbisComment, fields, write_blocks, STREAMINFO, VORBIS_COMMENT};
///
/// let mut comment = VorbisComment::default();
/// comment.set(fields::TITLE, "Example");
///
/// let streaminfo = RawBlock { block_type: STREAMINFO, data: vec![0; 34] };
/// let mut file = Vec::new();
/// write_blocks(
///     &mut file,
///     &[streaminfo, RawBlock::build(VORBIS_COMMENT, &comment).unwrap()],
/// )
/// .unwrap();
///
/// let metadata = tag_codec::parse(&file, "example.flac").unwrap();
/// assert_eq!(metadata.title.as_deref(), Some("Example"));
/// assert_eq!(metadata.artist, None);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Track title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Track artist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Album name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Plain lyric text with any timestamps stripped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    /// Timed lyric lines, sorted by time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_lyrics: Option<Vec<LyricLine>>,
    /// Embedded cover art
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<CoverImage>,
}

/// An embedded cover image
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImage {
    /// MIME type of the image data
    pub media_type: String,
    /// Raw image data
    pub data: Vec<u8>,
}

impl CoverImage {
    /// Wraps raw image data, judging its MIME type from the signature
    ///
    /// Anything that is not recognizably PNG is declared JPEG, by far
    /// the most common cover format and the safest guess for players
    /// that trust the declared type.
    ///
    /// # Example
    ///
    /// ```
    /// use tag_codec::CoverImage;
    ///
    /// let png = CoverImage::from_bytes(b"\x89PNG\x0D\x0A\x1A\x0A....".to_vec());
    /// assert_eq!(png.media_type, "image/png");
    ///
    /// let jpeg = CoverImage::from_bytes(b"\xFF\xD8\xFF\xE0....".to_vec());
    /// assert_eq!(jpeg.media_type, "image/jpeg");
    /// ```
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let media_type = if data.starts_with(b"\x89\x50\x4E\x47\x0D\x0A\x1A\x0A") {
            "image/png"
        } else {
            "image/jpeg"
        };

        Self {
            media_type: media_type.to_owned(),
            data,
        }
    }

    /// Reads an image file, judging its MIME type from the content
    /// rather than the file extension
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }
}

/// Fields to change when rewriting a file's tags
///
/// Absent fields are left alone in ID3v2 tags.  FLAC rewrites rebuild
/// the comment block from this struct, so an absent field there means
/// the field is dropped; callers wanting to keep a value pass it back.
///
/// # Example
///
/// ```
/// use tag_codec::TagUpdate;
///
/// let update = TagUpdate::default()
///     .title("New Title")
///     .artist("New Artist");
///
/// assert_eq!(update.title.as_deref(), Some("New Title"));
/// assert_eq!(update.album, None);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUpdate {
    /// New track title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New track artist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// New album name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// New lyric text, timestamps and all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    /// New cover art
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<CoverImage>,
}

impl TagUpdate {
    /// Sets the track title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the track artist
    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Sets the album name
    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Sets the lyric text
    pub fn lyrics(mut self, lyrics: impl Into<String>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }

    /// Sets the cover art
    pub fn cover(mut self, cover: CoverImage) -> Self {
        self.cover = Some(cover);
        self
    }
}

/// Extracts tag values from an in-memory audio file
///
/// The container is identified from the leading bytes alone.
/// `file_name` only flavors log output, so a misnamed file still
/// parses by what it actually is.
///
/// # Errors
///
/// Returned if the container is MP4 (recognized but unsupported) or
/// cannot be identified at all.
pub fn parse(bytes: &[u8], file_name: &str) -> Result<Metadata, Error> {
    let format = Format::sniff(bytes);
    debug!("parsing {file_name} as {format:?}");

    match format {
        Format::Flac => Ok(parse_flac(bytes)),
        Format::Mp3 => Ok(parse_mp3(bytes)),
        Format::Mp4 => Err(Error::UnsupportedContainer),
        Format::Unknown => Err(Error::UnknownContainer),
    }
}

/// Comment fields checked for lyrics, most conventional first
const LYRIC_FIELDS: [&str; 5] = [
    fields::LYRICS,
    fields::UNSYNCEDLYRICS,
    fields::LYRIC,
    fields::SYNCEDLYRICS,
    fields::SYNCHRONIZEDLYRICS,
];

fn parse_flac(bytes: &[u8]) -> Metadata {
    let mut metadata = Metadata::default();
    let mut comment = None;

    for block in flac::scan_blocks(bytes) {
        match block.block_type {
            flac::VORBIS_COMMENT if comment.is_none() => match block.decode::<VorbisComment>() {
                Ok(decoded) => comment = Some(decoded),
                Err(err) => warn!("undecodable comment block: {err}"),
            },
            flac::PICTURE if metadata.cover.is_none() => match block.decode::<Picture>() {
                Ok(picture) => {
                    metadata.cover = Some(CoverImage {
                        media_type: picture.media_type,
                        data: picture.data,
                    });
                }
                Err(err) => warn!("undecodable picture block: {err}"),
            },
            _ => {}
        }
    }

    let Some(comment) = comment else {
        return metadata;
    };

    metadata.title = comment.get(fields::TITLE).and_then(normalize);
    metadata.artist = comment.get(fields::ARTIST).and_then(normalize);
    metadata.album = comment.get(fields::ALBUM).and_then(normalize);

    for field in LYRIC_FIELDS {
        if metadata.lyrics.is_some() && metadata.synced_lyrics.is_some() {
            break;
        }
        if let Some(text) = comment.get(field) {
            take_lyrics(&mut metadata, text);
        }
    }

    // taggers without a lyrics field sometimes stash LRC text in a
    // comment; only timestamped text is trusted to be lyrics there
    if metadata.lyrics.is_none() && metadata.synced_lyrics.is_none() {
        for field in [fields::COMMENT, fields::DESCRIPTION] {
            if let Some(text) = comment.get(field).filter(|text| lrc::has_timestamp(text)) {
                take_lyrics(&mut metadata, text);
                break;
            }
        }
    }

    metadata
}

/// Fills the lyric fields still unset from one candidate value
fn take_lyrics(metadata: &mut Metadata, text: &str) {
    let parsed = lrc::parse(text);

    if metadata.synced_lyrics.is_none() {
        metadata.synced_lyrics = parsed.synced;
    }
    if metadata.lyrics.is_none() {
        metadata.lyrics = parsed.plain;
    }
}

fn parse_mp3(bytes: &[u8]) -> Metadata {
    let mut metadata = Metadata::default();

    let Some(header) = TagHeader::parse(bytes) else {
        warn!("no usable ID3v2 tag, nothing to extract");
        return metadata;
    };

    let region = id3::frame_region(id3::tag_body(bytes, &header), &header);
    let mut lyric_text = None;
    let mut timed_lines = None;

    for frame in id3::Frames::new(region, header.major) {
        match frame.id {
            id3::ids::TITLE if metadata.title.is_none() => {
                metadata.title = id3::text_frame(frame.data);
            }
            id3::ids::ARTIST if metadata.artist.is_none() => {
                metadata.artist = id3::text_frame(frame.data);
            }
            id3::ids::ALBUM if metadata.album.is_none() => {
                metadata.album = id3::text_frame(frame.data);
            }
            id3::ids::LYRICS if lyric_text.is_none() => {
                lyric_text = id3::uslt_text(frame.data);
            }
            id3::ids::SYNCED_LYRICS if timed_lines.is_none() => {
                timed_lines = id3::sylt_lines(frame.data);
            }
            id3::ids::PICTURE if metadata.cover.is_none() => {
                metadata.cover = id3::apic(frame.data);
            }
            _ => {}
        }
    }

    // lyric text is often LRC even inside a USLT frame; a dedicated
    // SYLT frame still outranks timestamps recovered from it
    if let Some(text) = lyric_text {
        let parsed = lrc::parse(&text);
        metadata.lyrics = parsed.plain;
        metadata.synced_lyrics = timed_lines.or(parsed.synced);
    } else {
        metadata.synced_lyrics = timed_lines;
    }

    metadata
}
