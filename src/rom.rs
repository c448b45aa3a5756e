//! The ROM descriptor: a location plus content identity.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::checksum::{ChecksumKind, ChecksumSet, Digest};
use crate::error::{Error, Result};
use crate::rompath::RomPath;

/// Which part of a headered dump an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomPart {
    /// Header plus content.
    All,
    /// Content only, past the header.
    Rom,
    /// The header bytes alone.
    Header,
}

/// Everything the vault knows about one ROM: where it lives, how big
/// its content is (excluding any header), the detected header length,
/// and a partial checksum map.
#[derive(Debug, Clone)]
pub struct Rom {
    path: RomPath,
    size: Option<u64>,
    offset: Option<u64>,
    checksums: ChecksumSet,
}

/// Serializable view of a ROM's identity, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct RomInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Rom {
    /// Bind a path to its identity. A known size forces a defined
    /// offset (zero when unheadered); zero-size content acquires the
    /// full nil checksum map.
    pub fn new(
        path: RomPath,
        size: Option<u64>,
        offset: Option<u64>,
        checksums: ChecksumSet,
    ) -> Self {
        let offset = match (size, offset) {
            (Some(_), None) => Some(0),
            (None, _) => None,
            (_, offset) => offset,
        };
        let checksums = if size == Some(0) {
            ChecksumSet::nil()
        } else {
            checksums
        };
        if size.is_none() {
            log::warn!("ROM {path} has no size");
        }
        Rom {
            path,
            size,
            offset,
            checksums,
        }
    }

    pub fn from_digest(path: RomPath, digest: Digest) -> Self {
        Self::new(
            path,
            Some(digest.size),
            Some(digest.offset),
            digest.checksums,
        )
    }

    pub fn path(&self) -> &RomPath {
        &self.path
    }

    pub fn path_mut(&mut self) -> &mut RomPath {
        &mut self.path
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn checksums(&self) -> &ChecksumSet {
        &self.checksums
    }

    /// The entry name relative to the storage.
    pub fn entry(&self) -> String {
        self.path.entry()
    }

    /// Last segment of the entry.
    pub fn name(&self) -> String {
        self.path.basename()
    }

    /// Hex digest used for content-addressed filenames.
    pub fn fs_name(&self) -> Option<&str> {
        self.checksums.get(ChecksumKind::FILESYSTEM)
    }

    /// Tri-state content equality, strongest shared checksum decides.
    pub fn same(&self, other: &Rom) -> Option<bool> {
        self.checksums.same(other.checksums())
    }

    /// Checksum map plus size and offset (offset omitted when zero).
    pub fn info(&self) -> RomInfo {
        RomInfo {
            sha256: self.checksums.sha256.clone(),
            sha1: self.checksums.sha1.clone(),
            md5: self.checksums.md5.clone(),
            crc32: self.checksums.crc32.clone(),
            size: self.size,
            offset: self.offset.filter(|o| *o > 0),
        }
    }

    /// True iff every requested checksum kind is present.
    pub fn has_checksums(&self, required: &[ChecksumKind]) -> bool {
        self.checksums.has_all(required)
    }

    pub fn headered(&self) -> bool {
        self.offset.unwrap_or(0) > 0
    }

    /// The raw header bytes, or `None` for unheadered ROMs.
    pub fn header(&self) -> Result<Option<Vec<u8>>> {
        let Some(offset) = self.offset.filter(|o| *o > 0) else {
            return Ok(None);
        };
        let reader = self.path.reader()?;
        let mut header = Vec::with_capacity(offset as usize);
        reader.take(offset).read_to_end(&mut header)?;
        Ok(Some(header))
    }

    /// Copy the selected part to `dst`. `Header` fails on unheadered
    /// ROMs; partial copies never hardlink.
    pub fn copy(&self, dst: &Path, part: RomPart, force: bool, link: bool) -> Result<bool> {
        let offset = self.offset.unwrap_or(0);
        match part {
            RomPart::All => self.path.copy(dst, None, 0, force, link),
            RomPart::Rom => self.path.copy(dst, None, offset, force, link && offset == 0),
            RomPart::Header => {
                if !self.headered() {
                    return Err(Error::processing(format!("{} has no header", self.path)));
                }
                self.path.copy(dst, Some(offset), 0, force, false)
            }
        }
    }

    /// Remove the physical target; the descriptor keeps its entry as a
    /// virtual path.
    pub fn delete(&mut self) -> Result<bool> {
        self.path.delete()
    }

    pub fn rename(&mut self, new_entry: &str, force: bool) -> Result<bool> {
        self.path.rename(new_entry, force)
    }
}

impl fmt::Display for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Ingest one plain file: digest it and bind the descriptor.
pub fn from_file(entry: &Path, basedir: Option<&Path>) -> Result<Rom> {
    let path = RomPath::file(entry, basedir.map(Path::to_path_buf))?;
    let full = path
        .file_path()
        .ok_or_else(|| Error::processing(format!("no file behind {path}")))?;
    let digest = crate::checksum::digest_file(&full)?;
    Ok(Rom::from_digest(path, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rompath::RomPath;
    use tempfile::tempdir;

    #[test]
    fn zero_size_rom_carries_nil_checksums() {
        let rom = Rom::new(
            RomPath::catalog("empty.bin"),
            Some(0),
            None,
            ChecksumSet::new(),
        );
        for kind in ChecksumKind::STRENGTH {
            assert_eq!(rom.checksums().get(kind), Some(kind.nil()));
        }
        assert_eq!(rom.offset(), Some(0));
    }

    #[test]
    fn known_size_forces_zero_offset() {
        let rom = Rom::new(
            RomPath::catalog("a.bin"),
            Some(10),
            None,
            ChecksumSet::new(),
        );
        assert_eq!(rom.offset(), Some(0));
        assert!(!rom.headered());
    }

    #[test]
    fn headered_iff_offset_positive() {
        let rom = Rom::new(
            RomPath::catalog("a.nes"),
            Some(10),
            Some(16),
            ChecksumSet::new(),
        );
        assert!(rom.headered());
        assert_eq!(rom.info().offset, Some(16));

        let bare = Rom::new(
            RomPath::catalog("b.bin"),
            Some(10),
            Some(0),
            ChecksumSet::new(),
        );
        assert!(!bare.headered());
        assert_eq!(bare.info().offset, None);
    }

    #[test]
    fn header_bytes_match_offset() {
        let dir = tempdir().unwrap();
        let mut data = b"NES\x1a".to_vec();
        data.extend_from_slice(&[7u8; 12]);
        data.extend_from_slice(b"abc");
        std::fs::write(dir.path().join("game.nes"), &data).unwrap();

        let rom = from_file(Path::new("game.nes"), Some(dir.path())).unwrap();
        assert!(rom.headered());
        let header = rom.header().unwrap().unwrap();
        assert_eq!(header.len() as u64, rom.offset().unwrap());
        assert_eq!(&header[..4], b"NES\x1a");
    }

    #[test]
    fn copy_parts_split_header_and_body() {
        let dir = tempdir().unwrap();
        let mut data = b"NES\x1a".to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(b"abc");
        std::fs::write(dir.path().join("game.nes"), &data).unwrap();

        let rom = from_file(Path::new("game.nes"), Some(dir.path())).unwrap();

        let body = dir.path().join("body.bin");
        assert!(rom.copy(&body, RomPart::Rom, false, false).unwrap());
        assert_eq!(std::fs::read(&body).unwrap(), b"abc");

        let header = dir.path().join("header.bin");
        assert!(rom.copy(&header, RomPart::Header, false, false).unwrap());
        assert_eq!(std::fs::read(&header).unwrap().len(), 16);

        let all = dir.path().join("all.bin");
        assert!(rom.copy(&all, RomPart::All, false, false).unwrap());
        assert_eq!(std::fs::read(&all).unwrap(), data);
    }

    #[test]
    fn header_copy_fails_for_unheadered() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("plain.bin"), b"abc").unwrap();
        let rom = from_file(Path::new("plain.bin"), Some(dir.path())).unwrap();
        assert!(rom
            .copy(&dir.path().join("h.bin"), RomPart::Header, false, false)
            .is_err());
    }

    #[test]
    fn delete_keeps_descriptor_as_virtual() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        let mut rom = from_file(Path::new("a.bin"), Some(dir.path())).unwrap();
        let sha1 = rom.fs_name().unwrap().to_string();

        assert!(rom.delete().unwrap());
        assert!(rom.path().is_virtual());
        assert_eq!(rom.entry(), "a.bin");
        // Identity survives the transition.
        assert_eq!(rom.fs_name(), Some(sha1.as_str()));
    }
}
