//! Reading and rewriting the tags of MP3 and FLAC audio files
//!
//! Extraction works on in-memory bytes and never fails on damaged
//! tags, only on containers it cannot identify.  Rewriting works on
//! files in place, keeps the audio stream untouched, and rolls back
//! on failure.  See [`parse`] and [`write`] for the two entry points.

use std::io::Read;

pub mod cursor;
pub mod flac;
pub mod id3;
pub mod lrc;
pub mod service;
pub mod tag;
pub mod write;

pub use lrc::{LyricLine, Lyrics};
pub use tag::{CoverImage, Metadata, TagUpdate, parse};
pub use write::{WriteOptions, WriteOutcome, write, write_with};

/// An audio container identified from a file's leading bytes
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    /// MP3 with an ID3v2 tag
    Mp3,
    /// FLAC
    Flac,
    /// The MP4 family, recognized but not handled
    Mp4,
    /// Anything else
    Unknown,
}

impl Format {
    /// Identifies the container from the start of a file
    ///
    /// Only the leading bytes matter; file extensions lie too often
    /// to be worth consulting.
    ///
    /// # Example
    ///
    /// ```
    /// use tag_codec::Format;
    ///
    /// assert_eq!(Format::sniff(b"fLaC\x00\x00\x00\x22"), Format::Flac);
    /// assert_eq!(Format::sniff(b"ID3\x04\x00\x00\x00\x00\x00\x00"), Format::Mp3);
    /// assert_eq!(Format::sniff(b"\x00\x00\x00\x20ftypM4A "), Format::Mp4);
    /// assert_eq!(Format::sniff(b"OggS"), Format::Unknown);
    /// ```
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(flac::FLAC_TAG) {
            Self::Flac
        } else if bytes.starts_with(b"ID3") {
            Self::Mp3
        } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            Self::Mp4
        } else {
            Self::Unknown
        }
    }

    /// Identifies the container of the file at `path`
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let mut file = std::fs::File::open(path)?;
        let mut head = [0; 12];
        let mut filled = 0;
        while filled < head.len() {
            match file.read(&mut head[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(Self::sniff(&head[..filled]))
    }
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    MissingFlacTag,
    MissingStreaminfo,
    MissingId3Tag,
    InvalidBlockSize,
    ExcessiveTagSize,
    ExcessiveStringLength,
    ExcessiveVorbisEntries,
    UnsupportedContainer,
    UnknownContainer,
    MissingSource,
    TaggerFailed,
    WriteRolledBack(Box<Error>),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::MissingFlacTag => "missing FLAC tag".fmt(f),
            Self::MissingStreaminfo => "STREAMINFO block not first in file".fmt(f),
            Self::MissingId3Tag => "no ID3v2.3 or ID3v2.4 tag in file".fmt(f),
            Self::InvalidBlockSize => "invalid metadata block size".fmt(f),
            Self::ExcessiveTagSize => "tag too large for its size field".fmt(f),
            Self::ExcessiveStringLength => "string too large for size field".fmt(f),
            Self::ExcessiveVorbisEntries => "excessive VORBIS_COMMENT entries".fmt(f),
            Self::UnsupportedContainer => "unsupported audio container".fmt(f),
            Self::UnknownContainer => "unrecognized audio container".fmt(f),
            Self::MissingSource => "source file not found".fmt(f),
            Self::TaggerFailed => "external tagger exited with an error".fmt(f),
            Self::WriteRolledBack(e) => write!(f, "write failed, original file restored: {e}"),
        }
    }
}
