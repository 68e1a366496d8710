// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rewriting tags on disk without touching the audio stream
//!
//! ID3v2 tags get patched in place when the new frames fit inside the
//! existing tag area, since that area is usually padded for exactly
//! this purpose.  When they do not fit, or the tag carries flags the
//! patch could not honor, the file is rebuilt through a temp file in
//! the same directory and atomically renamed over the original.
//!
//! FLAC rewrites always rebuild and are bracketed by a sibling
//! `.backup` copy of the file.  Any failure between backup and rename
//! puts the original bytes back, and a failed rebuild can optionally
//! be retried through an installed `metaflac` binary before giving up.

use crate::flac::{self, Picture, RawBlock, VorbisComment, fields};
use crate::id3::{self, TagHeader};
use crate::tag::TagUpdate;
use crate::{Error, Format};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Padding granted to a rebuilt ID3v2 tag, so the next few edits can
/// patch in place instead of rebuilding again
const FRESH_PADDING: usize = 1024;

/// Knobs for [`write_with`]
///
/// # Example
///
/// ```
/// use tag_codec::WriteOptions;
///
/// let options = WriteOptions::default()
///     .no_external_fallback()
///     .vendor_string("my tagger 1.0");
/// ```
#[derive(Clone, Debug)]
pub struct WriteOptions {
    external_fallback: bool,
    vendor_string: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            external_fallback: true,
            vendor_string: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
                .to_owned(),
        }
    }
}

impl WriteOptions {
    /// Never shells out to `metaflac`, even when a FLAC rebuild fails
    pub fn no_external_fallback(mut self) -> Self {
        self.external_fallback = false;
        self
    }

    /// Vendor string stamped into rebuilt `VORBIS_COMMENT` blocks
    pub fn vendor_string(mut self, vendor: impl Into<String>) -> Self {
        self.vendor_string = vendor.into();
        self
    }
}

/// A write result flattened for serialization across a process boundary
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    /// Whether the file now carries the updated tags
    pub success: bool,
    /// Human-readable failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), Error>> for WriteOutcome {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Applies a tag update to the file at `path` with default options
///
/// # Errors
///
/// Returned if the file is missing, is not a writable container, or
/// the rewrite fails.  A FLAC failure restores the original bytes
/// before returning.
pub fn write(path: impl AsRef<Path>, update: &TagUpdate) -> Result<(), Error> {
    write_with(path, update, WriteOptions::default())
}

/// Applies a tag update to the file at `path`
pub fn write_with(
    path: impl AsRef<Path>,
    update: &TagUpdate,
    options: WriteOptions,
) -> Result<(), Error> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::MissingSource);
    }

    match Format::from_path(path)? {
        Format::Flac => write_flac(path, update, &options),
        Format::Mp3 => write_mp3(path, update),
        Format::Mp4 => Err(Error::UnsupportedContainer),
        Format::Unknown => Err(Error::UnknownContainer),
    }
}

/// A sibling copy of a file about to be modified
///
/// Stays armed until committed.  Dropping an armed backup, by early
/// return or panic, renames the copy back over the original.
struct Backup {
    original: PathBuf,
    backup: PathBuf,
    armed: bool,
}

impl Backup {
    fn create(original: &Path) -> Result<Self, Error> {
        let mut backup = original.as_os_str().to_owned();
        backup.push(".backup");
        let backup = PathBuf::from(backup);

        if let Err(err) = fs::copy(original, &backup) {
            let _ = fs::remove_file(&backup);
            return Err(err.into());
        }

        debug!("backed up {} to {}", original.display(), backup.display());
        Ok(Self {
            original: original.to_owned(),
            backup,
            armed: true,
        })
    }

    /// Keeps the modified original and discards the backup copy
    fn commit(mut self) {
        self.armed = false;
        if let Err(err) = fs::remove_file(&self.backup) {
            warn!("backup {} left behind: {err}", self.backup.display());
        }
    }

    fn rollback(self) {
        // restoration happens in Drop
    }

    fn restore(&mut self) {
        if std::mem::take(&mut self.armed) {
            match fs::rename(&self.backup, &self.original) {
                Ok(()) => info!("restored {} from backup", self.original.display()),
                Err(err) => error!(
                    "could not restore {}, data is in {}: {err}",
                    self.original.display(),
                    self.backup.display()
                ),
            }
        }
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        self.restore();
    }
}

fn staging_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn write_mp3(path: &Path, update: &TagUpdate) -> Result<(), Error> {
    let mut file = File::open(path)?;
    let mut head = [0; TagHeader::LEN];
    file.read_exact(&mut head)?;
    let header = TagHeader::parse(&head).ok_or(Error::MissingId3Tag)?;

    let mut body = vec![0; header.size as usize];
    file.read_exact(&mut body)?;

    let region = id3::frame_region(&body, &header);
    let frames = id3::rebuild_frames(header.major, region, update)?;

    // in-place only when the header needs no change at all; any flag
    // would survive the patch while describing the old body
    if header.flags == 0 && frames.len() <= header.size as usize {
        let padding = header.size as usize - frames.len();
        debug!("patching tag in place with {padding} bytes of padding");
        drop(file);

        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(TagHeader::LEN as u64))?;
        file.write_all(&frames)?;
        io::copy(&mut io::repeat(0).take(padding as u64), &mut file)?;
        file.sync_all()?;
        Ok(())
    } else {
        debug!(
            "rebuilding tag, {} frame bytes outgrow {} byte area",
            frames.len(),
            header.size
        );

        let head = id3::render_header(header.major, frames.len() + FRESH_PADDING)?;
        let mut tmp = NamedTempFile::new_in(staging_dir(path))?;
        tmp.write_all(&head)?;
        tmp.write_all(&frames)?;
        tmp.write_all(&[0; FRESH_PADDING])?;
        // the read handle sits at the first audio byte
        io::copy(&mut file, tmp.as_file_mut())?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(path).map_err(|err| Error::Io(err.error))?;
        Ok(())
    }
}

fn write_flac(path: &Path, update: &TagUpdate, options: &WriteOptions) -> Result<(), Error> {
    let backup = Backup::create(path)?;

    match rebuild_flac(path, update, options) {
        Ok(()) => {
            backup.commit();
            Ok(())
        }
        Err(err) => {
            warn!("flac rewrite failed: {err}");
            backup.rollback();

            if options.external_fallback && metaflac_available() {
                info!("retrying with external metaflac");
                write_flac_external(path, update)
            } else {
                Err(Error::WriteRolledBack(Box::new(err)))
            }
        }
    }
}

fn rebuild_flac(path: &Path, update: &TagUpdate, options: &WriteOptions) -> Result<(), Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut blocks = flac::read_blocks(&mut reader)?;

    blocks.retain(|block| !matches!(block.block_type, flac::VORBIS_COMMENT | flac::PICTURE));
    if blocks.first().map(|block| block.block_type) != Some(flac::STREAMINFO) {
        return Err(Error::MissingStreaminfo);
    }

    let mut comment = VorbisComment {
        vendor_string: options.vendor_string.clone(),
        fields: Vec::new(),
    };
    let text_fields = [
        (fields::TITLE, &update.title),
        (fields::ARTIST, &update.artist),
        (fields::ALBUM, &update.album),
        (fields::LYRICS, &update.lyrics),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            comment.set(field, value);
        }
    }
    blocks.push(RawBlock::build(flac::VORBIS_COMMENT, &comment)?);

    if let Some(cover) = &update.cover {
        let picture = Picture::front_cover(cover.media_type.clone(), cover.data.clone());
        blocks.push(RawBlock::build(flac::PICTURE, &picture)?);
    }

    let mut tmp = NamedTempFile::new_in(staging_dir(path))?;
    flac::write_blocks(tmp.as_file_mut(), &blocks)?;
    // reader sits at the first audio frame after the strict block read
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

fn write_flac_external(path: &Path, update: &TagUpdate) -> Result<(), Error> {
    let backup = Backup::create(path)?;

    match run_metaflac(path, update) {
        Ok(()) => {
            backup.commit();
            Ok(())
        }
        Err(err) => {
            backup.rollback();
            Err(Error::WriteRolledBack(Box::new(err)))
        }
    }
}

fn metaflac_available() -> bool {
    Command::new("metaflac")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Drives `metaflac` through the same strip-then-set sequence the
/// built-in rebuild performs
///
/// Field values travel through files in a private temp directory, so
/// multi-line lyrics survive without any shell quoting concerns.
fn run_metaflac(path: &Path, update: &TagUpdate) -> Result<(), Error> {
    let staging = tempfile::tempdir()?;

    let mut strip = Command::new("metaflac");
    strip
        .arg("--remove")
        .arg("--block-type=VORBIS_COMMENT,PICTURE")
        .arg(path);
    run(strip)?;

    let text_fields = [
        (fields::TITLE, &update.title),
        (fields::ARTIST, &update.artist),
        (fields::ALBUM, &update.album),
        (fields::LYRICS, &update.lyrics),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            let value_path = staging.path().join(field);
            fs::write(&value_path, value)?;

            let mut set = Command::new("metaflac");
            set.arg(format!(
                "--set-tag-from-file={field}={}",
                value_path.display()
            ))
            .arg(path);
            run(set)?;
        }
    }

    if let Some(cover) = &update.cover {
        let cover_path = staging.path().join("cover");
        fs::write(&cover_path, &cover.data)?;

        let mut import = Command::new("metaflac");
        import
            .arg(format!("--import-picture-from={}", cover_path.display()))
            .arg(path);
        run(import)?;
    }

    Ok(())
}

fn run(mut command: Command) -> Result<(), Error> {
    let output = command.output()?;
    if output.status.success() {
        Ok(())
    } else {
        warn!(
            "metaflac exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        Err(Error::TaggerFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(dir: &tempfile::TempDir, contents: &[u8]) -> PathBuf {
        let path = dir.path().join("track.flac");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn committed_backup_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, b"original");

        let backup = Backup::create(&path).unwrap();
        fs::write(&path, b"modified").unwrap();
        backup.commit();

        assert_eq!(fs::read(&path).unwrap(), b"modified");
        assert!(!path.with_extension("flac.backup").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn rollback_restores_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, b"original");

        let backup = Backup::create(&path).unwrap();
        fs::write(&path, b"half-written garbage").unwrap();
        backup.rollback();

        assert_eq!(fs::read(&path).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dropped_backup_restores_like_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, b"original");

        {
            let _backup = Backup::create(&path).unwrap();
            fs::write(&path, b"interrupted").unwrap();
        }

        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[test]
    fn missing_file_is_reported_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.flac");

        assert!(matches!(
            write(&path, &TagUpdate::default()),
            Err(Error::MissingSource)
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
