use std::fs::File;
use std::io::Read;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use md5::{Digest as Md5Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::headers;

/// Streaming chunk size for the single-pass digester.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// The checksum kinds a ROM may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Sha256,
    Sha1,
    Md5,
    Crc32,
}

impl ChecksumKind {
    /// All kinds, strongest first. Matching and equality walk this order.
    pub const STRENGTH: [ChecksumKind; 4] = [
        ChecksumKind::Sha256,
        ChecksumKind::Sha1,
        ChecksumKind::Md5,
        ChecksumKind::Crc32,
    ];

    pub const STRONG: [ChecksumKind; 3] =
        [ChecksumKind::Sha256, ChecksumKind::Sha1, ChecksumKind::Md5];

    pub const WEAK: [ChecksumKind; 1] = [ChecksumKind::Crc32];

    /// Kind used for content-addressed filesystem names.
    pub const FILESYSTEM: ChecksumKind = ChecksumKind::Sha1;

    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha1 => "sha1",
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Crc32 => "crc32",
        }
    }

    /// Canonical hex string length.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumKind::Sha256 => 64,
            ChecksumKind::Sha1 => 40,
            ChecksumKind::Md5 => 32,
            ChecksumKind::Crc32 => 8,
        }
    }

    pub fn bits(self) -> usize {
        self.hex_len() * 4
    }

    /// Digest of empty content.
    pub fn nil(self) -> &'static str {
        match self {
            ChecksumKind::Sha256 => {
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            }
            ChecksumKind::Sha1 => "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            ChecksumKind::Md5 => "d41d8cd98f00b204e9800998ecf8427e",
            ChecksumKind::Crc32 => "00000000",
        }
    }
}

/// Validate a hex digest and normalize it to canonical lowercase.
pub fn normalize(kind: ChecksumKind, value: &str) -> Result<String> {
    let bytes = hex::decode(value)
        .map_err(|_| Error::content(format!("invalid {} value: {value:?}", kind.name())))?;
    if bytes.len() * 2 != kind.hex_len() {
        return Err(Error::content(format!(
            "bad {} width: expected {} hex chars, got {}",
            kind.name(),
            kind.hex_len(),
            value.len()
        )));
    }
    Ok(hex::encode(bytes))
}

/// A partial map of checksums, all lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSet {
    pub sha256: Option<String>,
    pub sha1: Option<String>,
    pub md5: Option<String>,
    pub crc32: Option<String>,
}

impl ChecksumSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full map of empty-content digests, carried by zero-size ROMs.
    pub fn nil() -> Self {
        let mut set = Self::default();
        for kind in ChecksumKind::STRENGTH {
            set.store(kind, kind.nil().to_string());
        }
        set
    }

    pub fn get(&self, kind: ChecksumKind) -> Option<&str> {
        match kind {
            ChecksumKind::Sha256 => self.sha256.as_deref(),
            ChecksumKind::Sha1 => self.sha1.as_deref(),
            ChecksumKind::Md5 => self.md5.as_deref(),
            ChecksumKind::Crc32 => self.crc32.as_deref(),
        }
    }

    fn store(&mut self, kind: ChecksumKind, value: String) {
        match kind {
            ChecksumKind::Sha256 => self.sha256 = Some(value),
            ChecksumKind::Sha1 => self.sha1 = Some(value),
            ChecksumKind::Md5 => self.md5 = Some(value),
            ChecksumKind::Crc32 => self.crc32 = Some(value),
        }
    }

    /// Insert a digest after width validation and case normalization.
    pub fn set(&mut self, kind: ChecksumKind, value: &str) -> Result<()> {
        let canonical = normalize(kind, value)?;
        self.store(kind, canonical);
        Ok(())
    }

    pub fn with(mut self, kind: ChecksumKind, value: &str) -> Result<Self> {
        self.set(kind, value)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        ChecksumKind::STRENGTH.iter().all(|k| self.get(*k).is_none())
    }

    /// True iff every requested kind is present.
    pub fn has_all(&self, kinds: &[ChecksumKind]) -> bool {
        kinds.iter().all(|k| self.get(*k).is_some())
    }

    /// Tri-state content equality. The strongest kind defined on both
    /// sides decides; `None` when no kind is shared.
    pub fn same(&self, other: &ChecksumSet) -> Option<bool> {
        for kind in ChecksumKind::STRENGTH {
            if let (Some(a), Some(b)) = (self.get(kind), other.get(kind)) {
                return Some(a == b);
            }
        }
        None
    }
}

/// Result of one streaming pass: digests of the content past any
/// detected header, the content size, and the header length.
#[derive(Debug, Clone)]
pub struct Digest {
    pub checksums: ChecksumSet,
    pub size: u64,
    pub offset: u64,
}

/// Compute all four digests in one pass. The first chunk is consulted
/// for a known header signature; when one matches, only the bytes past
/// the header contribute to size and digests. A header rule that would
/// need bytes past end-of-stream simply fails, so short files are
/// treated as unheadered rather than erroring.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<Digest> {
    let mut buf = vec![0u8; CHUNK_SIZE];

    // Fill the first chunk completely so header rules see a stable prefix.
    let mut filled = 0usize;
    loop {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() {
            break;
        }
    }

    let offset = headers::detect(&buf[..filled]).map(|h| h.size).unwrap_or(0);

    let mut crc32 = Crc32::new();
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut size = 0u64;

    let start = (offset as usize).min(filled);
    let first = &buf[start..filled];
    crc32.update(first);
    md5.update(first);
    sha1.update(first);
    sha256.update(first);
    size += first.len() as u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let slice = &buf[..n];
        crc32.update(slice);
        md5.update(slice);
        sha1.update(slice);
        sha256.update(slice);
        size += n as u64;
    }

    let checksums = ChecksumSet {
        sha256: Some(format!("{:064x}", sha256.finalize())),
        sha1: Some(sha1.digest().to_string()),
        md5: Some(format!("{:032x}", md5.finalize())),
        crc32: Some(format!("{:08x}", crc32.finalize())),
    };

    Ok(Digest {
        checksums,
        size,
        offset,
    })
}

pub fn digest_file(path: &Path) -> Result<Digest> {
    let file = File::open(path)?;
    digest_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn digests_known_content() {
        let d = digest_reader(Cursor::new(b"abc")).unwrap();
        assert_eq!(d.size, 3);
        assert_eq!(d.offset, 0);
        assert_eq!(
            d.checksums.sha1.as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(
            d.checksums.md5.as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
        assert_eq!(
            d.checksums.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(d.checksums.crc32.as_deref(), Some("352441c2"));
    }

    #[test]
    fn empty_content_yields_nil_digests() {
        let d = digest_reader(Cursor::new(b"")).unwrap();
        assert_eq!(d.size, 0);
        for kind in ChecksumKind::STRENGTH {
            assert_eq!(d.checksums.get(kind), Some(kind.nil()));
        }
    }

    #[test]
    fn headered_file_digests_body_only() {
        // 16-byte NES header, then the payload.
        let mut data = Vec::new();
        data.extend_from_slice(b"NES\x1a");
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(b"abc");

        let d = digest_reader(Cursor::new(&data)).unwrap();
        assert_eq!(d.offset, 16);
        assert_eq!(d.size, 3);
        assert_eq!(
            d.checksums.sha1.as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
    }

    #[test]
    fn digest_file_matches_reader() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();

        let d = digest_file(f.path()).unwrap();
        assert_eq!(d.checksums.crc32.as_deref(), Some("352441c2"));
    }

    #[test]
    fn normalize_rejects_bad_width() {
        assert!(normalize(ChecksumKind::Crc32, "abcd").is_err());
        assert!(normalize(ChecksumKind::Sha1, "xyz").is_err());
        assert_eq!(
            normalize(ChecksumKind::Crc32, "DEADBEEF").unwrap(),
            "deadbeef"
        );
    }

    #[test]
    fn same_walks_strength_order() {
        let a = ChecksumSet::new()
            .with(ChecksumKind::Sha1, "a9993e364706816aba3e25717850c26c9cd0d89d")
            .unwrap()
            .with(ChecksumKind::Crc32, "352441c2")
            .unwrap();
        let weak_only = ChecksumSet::new()
            .with(ChecksumKind::Crc32, "352441c2")
            .unwrap();
        let differs = ChecksumSet::new()
            .with(ChecksumKind::Sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709")
            .unwrap();
        let disjoint = ChecksumSet::new()
            .with(ChecksumKind::Md5, "d41d8cd98f00b204e9800998ecf8427e")
            .unwrap();

        assert_eq!(a.same(&weak_only), Some(true));
        assert_eq!(a.same(&differs), Some(false));
        assert_eq!(weak_only.same(&disjoint), None);
    }
}
