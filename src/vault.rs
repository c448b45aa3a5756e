//! The vault: an insertion-ordered, content-indexed multi-map of ROM
//! descriptors with set algebra, directory/glob ingestion and
//! content-addressed export.

use std::collections::{BTreeMap, HashMap};
use std::ops::{BitAnd, Sub};
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::archive::{self, Archive};
use crate::checksum::{digest_file, digest_reader, ChecksumKind, ChecksumSet};
use crate::error::{Error, Result};
use crate::events::ScanEvent;
use crate::index::IndexEntry;
use crate::rom::{Rom, RomPart};
use crate::rompath::RomPath;

/// Conventional ancillary files a ROM directory may carry; never
/// ingested.
pub const IGNORED_FILES: &[&str] = &[".dat", ".index", ".missing", ".baddump", ".extra"];

/// Conventional working directories; never descended into.
pub const IGNORED_DIRS: &[&str] = &[".roms", ".games", ".trash"];

/// Content-addressed grouping for `copy_to`.
#[derive(Debug, Clone, Copy)]
pub enum Subdir {
    /// Flat layout.
    None,
    /// First 4 hex characters of the filesystem checksum.
    Default,
    /// First N+1 hex characters.
    Chars(usize),
}

#[derive(Debug, Serialize)]
pub struct CopyOutcome {
    pub rom: String,
    pub dest: PathBuf,
    pub copied: bool,
}

#[derive(Default)]
pub struct Vault {
    roms: Vec<Rom>,
    index: HashMap<ChecksumKind, HashMap<String, Vec<usize>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    pub fn roms(&self) -> &[Rom] {
        &self.roms
    }

    pub fn roms_mut(&mut self) -> &mut [Rom] {
        &mut self.roms
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rom> {
        self.roms.iter()
    }

    /// Append a ROM, updating the four inverted indexes. A second ROM
    /// with the same checksum and the same path string is kept in the
    /// sequence but not re-indexed (first wins).
    pub fn add(&mut self, rom: Rom) {
        let idx = self.roms.len();
        let path_string = rom.to_string();
        for kind in ChecksumKind::STRENGTH {
            if let Some(value) = rom.checksums().get(kind) {
                let bucket = self
                    .index
                    .entry(kind)
                    .or_default()
                    .entry(value.to_string())
                    .or_default();
                let same_path = bucket
                    .iter()
                    .any(|&i| self.roms[i].to_string() == path_string);
                if !same_path {
                    bucket.push(idx);
                }
            }
        }
        self.roms.push(rom);
    }

    /// Walk the query's checksums in strength order and return the
    /// first bucket hit.
    pub fn match_checksums(&self, checksums: &ChecksumSet) -> Option<Vec<&Rom>> {
        for kind in ChecksumKind::STRENGTH {
            let Some(value) = checksums.get(kind) else {
                continue;
            };
            if let Some(bucket) = self.index.get(&kind).and_then(|m| m.get(value)) {
                return Some(bucket.iter().map(|&i| &self.roms[i]).collect());
            }
        }
        None
    }

    pub fn match_rom(&self, rom: &Rom) -> Option<Vec<&Rom>> {
        self.match_checksums(rom.checksums())
    }

    pub fn contains(&self, rom: &Rom) -> bool {
        self.match_rom(rom).is_some()
    }

    /// ROMs of `self` that `other` matches, in `self`'s order.
    pub fn intersect(&self, other: &Vault) -> Vault {
        let mut out = Vault::new();
        for rom in &self.roms {
            if other.contains(rom) {
                out.add(rom.clone());
            }
        }
        out
    }

    /// ROMs of `self` that `other` does not match, in `self`'s order.
    pub fn difference(&self, other: &Vault) -> Vault {
        let mut out = Vault::new();
        for rom in &self.roms {
            if !other.contains(rom) {
                out.add(rom.clone());
            }
        }
        out
    }

    /// Ingest one path. A recognized archive extension contributes one
    /// ROM per entry; anything else is a single file. Returns `false`
    /// when the observer cancelled.
    pub fn add_from_file(
        &mut self,
        relative: &Path,
        basedir: Option<&Path>,
        observer: &mut impl FnMut(ScanEvent) -> bool,
    ) -> Result<bool> {
        let full = match basedir {
            Some(base) => base.join(relative),
            None => relative.to_path_buf(),
        };
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if archive::archive_extension(&name).is_some() {
            if let Some(container) =
                Archive::with_basedir(full.clone(), basedir.map(Path::to_path_buf))
            {
                for entry in container.entries()? {
                    if !observer(ScanEvent::Entry {
                        archive: &full,
                        entry: &entry,
                    }) {
                        return Ok(false);
                    }
                    let reader = container.reader(&entry)?;
                    let digest = digest_reader(reader)?;
                    self.add(Rom::from_digest(
                        RomPath::in_archive(container.clone(), entry),
                        digest,
                    ));
                }
                return Ok(true);
            }
        }

        if !observer(ScanEvent::File { path: &full }) {
            return Ok(false);
        }
        let digest = digest_file(&full)?;
        let path = RomPath::file(relative, basedir.map(Path::to_path_buf))?;
        self.add(Rom::from_digest(path, digest));
        Ok(true)
    }

    /// Pre-order ingestion of a directory tree, honoring the prune
    /// rules for conventional ancillary files, dot-directories,
    /// managed subdirectories, and the optional depth cap.
    pub fn add_from_dir(
        &mut self,
        dir: &Path,
        depth: Option<usize>,
        mut observer: impl FnMut(ScanEvent) -> bool,
    ) -> Result<()> {
        let mut walker = WalkDir::new(dir);
        if let Some(depth) = depth {
            walker = walker.max_depth(depth);
        }
        let root = dir.to_path_buf();
        for entry in walker
            .into_iter()
            .filter_entry(move |e| keep_entry(e, &root))
        {
            let entry =
                entry.map_err(|e| Error::processing(format!("walking {}: {e}", dir.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_path_buf();
            if !self.add_from_file(&relative, Some(dir), &mut observer)? {
                break;
            }
        }
        Ok(())
    }

    /// Ingest glob matches. The base directory is the longest literal
    /// prefix before the first unescaped metacharacter; the directory
    /// prune rules still apply to every match.
    pub fn add_from_glob(
        &mut self,
        pattern: &str,
        mut observer: impl FnMut(ScanEvent) -> bool,
    ) -> Result<()> {
        let base = glob_base(pattern);
        let matches =
            glob::glob(pattern).map_err(|e| Error::processing(format!("bad glob: {e}")))?;
        for path in matches {
            let path = path.map_err(|e| Error::processing(format!("glob: {e}")))?;
            if !path.is_file() {
                continue;
            }
            let relative = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
            if glob_pruned(&base, &relative) {
                continue;
            }
            if !self.add_from_file(&relative, Some(base.as_path()), &mut observer)? {
                break;
            }
        }
        Ok(())
    }

    /// Content-addressed copy into `dir`: each ROM lands under its
    /// filesystem-checksum name, optionally grouped by a hex prefix.
    pub fn copy_to(
        &self,
        dir: &Path,
        part: RomPart,
        subdir: Subdir,
        pristine: bool,
        force: bool,
    ) -> Result<Vec<CopyOutcome>> {
        self.copy_to_with(dir, part, pristine, force, |rom| match subdir {
            Subdir::None => None,
            Subdir::Default => rom.fs_name().map(|h| h[..4].to_string()),
            Subdir::Chars(n) => rom.fs_name().map(|h| h[..(n + 1).min(h.len())].to_string()),
        })
    }

    /// `copy_to` with a caller-supplied grouping function.
    pub fn copy_to_with(
        &self,
        dir: &Path,
        part: RomPart,
        pristine: bool,
        force: bool,
        group: impl Fn(&Rom) -> Option<String>,
    ) -> Result<Vec<CopyOutcome>> {
        if pristine && dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let mut outcomes = Vec::new();
        for rom in &self.roms {
            // ROMs with no physical storage have nothing to copy.
            if rom.path().is_virtual() {
                continue;
            }
            let Some(fs_name) = rom.fs_name().map(str::to_string) else {
                continue;
            };
            let mut target = dir.to_path_buf();
            if let Some(prefix) = group(rom) {
                target.push(prefix);
            }
            target.push(&fs_name);

            if target.exists() && !force {
                outcomes.push(CopyOutcome {
                    rom: rom.to_string(),
                    dest: target,
                    copied: false,
                });
                continue;
            }
            let copied = rom.copy(&target, part, force, true)?;
            outcomes.push(CopyOutcome {
                rom: rom.to_string(),
                dest: target,
                copied,
            });
        }
        Ok(outcomes)
    }

    /// Snapshot for persistence: path string to identity plus the
    /// current storage mtime. Virtual ROMs have no storage and are
    /// skipped.
    pub fn index(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let mut map = BTreeMap::new();
        for rom in &self.roms {
            let Some(file) = rom.path().file_path() else {
                continue;
            };
            let mtime = std::fs::metadata(&file)?.modified()?;
            let checksums = rom.checksums();
            map.insert(
                rom.to_string(),
                IndexEntry {
                    sha256: checksums.sha256.clone(),
                    sha1: checksums.sha1.clone(),
                    md5: checksums.md5.clone(),
                    crc32: checksums.crc32.clone(),
                    size: rom.size().unwrap_or(0),
                    offset: rom.offset().filter(|o| *o > 0),
                    timestamp: crate::index::format_timestamp(mtime),
                },
            );
        }
        Ok(map)
    }
}

impl BitAnd<&Vault> for &Vault {
    type Output = Vault;

    fn bitand(self, rhs: &Vault) -> Vault {
        self.intersect(rhs)
    }
}

impl Sub<&Vault> for &Vault {
    type Output = Vault;

    fn sub(self, rhs: &Vault) -> Vault {
        self.difference(rhs)
    }
}

fn keep_entry(entry: &walkdir::DirEntry, root: &Path) -> bool {
    if entry.path() == root {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        if IGNORED_DIRS.contains(&name.as_ref()) || name.starts_with('.') {
            return false;
        }
        // Subdirectories with their own catalog or index are managed
        // collections of their own.
        if entry.path().join(".dat").exists() || entry.path().join(".index").exists() {
            log::debug!("pruning managed directory {}", entry.path().display());
            return false;
        }
        true
    } else {
        !IGNORED_FILES.contains(&name.as_ref())
    }
}

/// Longest literal prefix of a glob pattern, cut at the last path
/// separator before the first unescaped metacharacter.
fn glob_base(pattern: &str) -> PathBuf {
    let bytes = pattern.as_bytes();
    let mut end = pattern.len();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'*' | b'?' | b'[' | b'{' => {
                end = i;
                break;
            }
            _ => i += 1,
        }
    }
    let prefix = &pattern[..end];
    match prefix.rfind('/') {
        Some(0) => PathBuf::from("/"),
        Some(pos) => PathBuf::from(&prefix[..pos]),
        None => PathBuf::from("."),
    }
}

fn glob_pruned(base: &Path, relative: &Path) -> bool {
    let components: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let mut current = base.to_path_buf();
    for (i, component) in components.iter().enumerate() {
        let last = i + 1 == components.len();
        if last {
            if IGNORED_FILES.contains(&component.as_str()) {
                return true;
            }
        } else {
            if IGNORED_DIRS.contains(&component.as_str()) || component.starts_with('.') {
                return true;
            }
            current.push(component);
            if current.join(".dat").exists() || current.join(".index").exists() {
                return true;
            }
        }
    }
    false
}
