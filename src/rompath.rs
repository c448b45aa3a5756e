//! Polymorphic ROM locations: a plain file under a base directory, an
//! entry inside an archive, or a virtual (catalog-only) reference.
//!
//! All variants answer the same operation set; virtual paths answer the
//! mutating ones as no-ops so callers never special-case them.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::archive::Archive;
use crate::error::{Error, Result};

/// Process-wide separator between an archive file and its entry in
/// rendered path strings. Set once at startup.
static ARCHIVE_SEPARATOR: Lazy<RwLock<String>> = Lazy::new(|| RwLock::new("#".to_string()));

pub fn archive_separator() -> String {
    ARCHIVE_SEPARATOR.read().unwrap().clone()
}

pub fn set_archive_separator(separator: &str) {
    *ARCHIVE_SEPARATOR.write().unwrap() = separator.to_string();
}

/// Render `file` + `entry` with the configured separator. A
/// two-character separator is treated as an open/close bracket pair.
pub fn join_archive_path(file: &str, entry: &str) -> String {
    join_with(&archive_separator(), file, entry)
}

pub(crate) fn join_with(separator: &str, file: &str, entry: &str) -> String {
    let mut chars = separator.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(open), Some(close), None) => format!("{file}{open}{entry}{close}"),
        _ => format!("{file}{separator}{entry}"),
    }
}

/// Split a rendered path string back into `(file, entry)`. Returns
/// `None` when the string does not follow the archive-path grammar.
pub fn split_archive_path(value: &str) -> Option<(String, String)> {
    let separator = archive_separator();
    split_with(&separator, value)
}

pub(crate) fn split_with(separator: &str, value: &str) -> Option<(String, String)> {
    let mut chars = separator.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(open), Some(close), None) => {
            let open_at = value.find(open)?;
            let rest = &value[open_at + open.len_utf8()..];
            let entry = rest.strip_suffix(close).unwrap_or(rest);
            Some((value[..open_at].to_string(), entry.to_string()))
        }
        _ => {
            let at = value.find(separator)?;
            Some((
                value[..at].to_string(),
                value[at + separator.len()..].to_string(),
            ))
        }
    }
}

/// Where a ROM physically lives.
#[derive(Debug, Clone)]
pub enum RomPath {
    /// A plain file `basedir/entry`; `entry` is always relative.
    File {
        entry: PathBuf,
        basedir: Option<PathBuf>,
    },
    /// One entry inside a container file.
    Archive { archive: Archive, entry: String },
    /// A catalog-only name with no physical backing.
    Virtual { entry: String },
}

impl RomPath {
    /// Plain-file path; rejects absolute entries.
    pub fn file(entry: impl Into<PathBuf>, basedir: Option<PathBuf>) -> Result<Self> {
        let entry = entry.into();
        if entry.is_absolute() || entry.to_string_lossy().starts_with('/') {
            return Err(Error::content(format!(
                "file entry must be relative: {}",
                entry.display()
            )));
        }
        Ok(RomPath::File { entry, basedir })
    }

    pub fn in_archive(archive: Archive, entry: impl Into<String>) -> Self {
        RomPath::Archive {
            archive,
            entry: entry.into(),
        }
    }

    pub fn catalog(entry: impl Into<String>) -> Self {
        RomPath::Virtual {
            entry: entry.into(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, RomPath::Virtual { .. })
    }

    /// The filesystem file backing this path, if any: the file itself,
    /// or the enclosing archive.
    pub fn file_path(&self) -> Option<PathBuf> {
        match self {
            RomPath::File { entry, basedir } => Some(match basedir {
                Some(base) => base.join(entry),
                None => entry.clone(),
            }),
            RomPath::Archive { archive, .. } => Some(archive.path().to_path_buf()),
            RomPath::Virtual { .. } => None,
        }
    }

    /// The grouping container: the base directory for files, the
    /// archive file for archive entries.
    pub fn storage(&self) -> Option<PathBuf> {
        match self {
            RomPath::File { basedir, .. } => basedir.clone(),
            RomPath::Archive { archive, .. } => Some(archive.path().to_path_buf()),
            RomPath::Virtual { .. } => None,
        }
    }

    pub fn entry(&self) -> String {
        match self {
            RomPath::File { entry, .. } => entry.to_string_lossy().into_owned(),
            RomPath::Archive { entry, .. } => entry.clone(),
            RomPath::Virtual { entry } => entry.clone(),
        }
    }

    /// Last segment of the entry.
    pub fn basename(&self) -> String {
        let entry = self.entry();
        entry
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(entry.as_str())
            .to_string()
    }

    pub fn exists(&self) -> bool {
        match self {
            RomPath::File { .. } => self.file_path().is_some_and(|p| p.is_file()),
            RomPath::Archive { archive, entry } => {
                archive.exists() && archive.include(entry).unwrap_or(false)
            }
            RomPath::Virtual { .. } => false,
        }
    }

    /// Open a read-only stream on the content. Fails for virtual paths.
    pub fn reader(&self) -> Result<Box<dyn Read>> {
        match self {
            RomPath::File { entry, basedir } => {
                let path = match basedir {
                    Some(base) => base.join(entry),
                    None => entry.clone(),
                };
                Ok(Box::new(File::open(path)?))
            }
            RomPath::Archive { archive, entry } => archive.reader(entry),
            RomPath::Virtual { .. } => Err(Error::NotSupported("reading a virtual path")),
        }
    }

    /// Copy the content (optionally a `len`-byte window starting at
    /// `offset`) to `dst`. Whole-file copies may hardlink when `link`
    /// is requested; partial copies never do. Returns `false` when the
    /// target exists and `force` is off, or for virtual paths.
    pub fn copy(
        &self,
        dst: &Path,
        len: Option<u64>,
        offset: u64,
        force: bool,
        link: bool,
    ) -> Result<bool> {
        match self {
            RomPath::Virtual { .. } => Ok(false),
            RomPath::File { entry, basedir } => {
                let src = match basedir {
                    Some(base) => base.join(entry),
                    None => entry.clone(),
                };
                if dst.exists() && !force {
                    return Ok(false);
                }
                let partial = len.is_some() || offset > 0;
                if link && !partial {
                    if dst.exists() {
                        std::fs::remove_file(dst)?;
                    }
                    ensure_parent(dst)?;
                    if std::fs::hard_link(&src, dst).is_ok() {
                        return Ok(true);
                    }
                }
                copy_stream(File::open(&src)?, dst, len, offset)?;
                Ok(true)
            }
            RomPath::Archive { archive, entry } => {
                if dst.exists() && !force {
                    return Ok(false);
                }
                let reader = archive.reader(entry)?;
                copy_stream(reader, dst, len, offset)?;
                Ok(true)
            }
        }
    }

    /// Rename to a new entry (relative to the same storage). Renaming
    /// to the current name is a no-op `true`; when identical content
    /// already sits at the target the source is dropped instead.
    pub fn rename(&mut self, new_entry: &str, force: bool) -> Result<bool> {
        match self {
            RomPath::File { entry, basedir } => {
                let src = match basedir {
                    Some(base) => base.join(&*entry),
                    None => entry.clone(),
                };
                let dst = match basedir {
                    Some(base) => base.join(new_entry),
                    None => PathBuf::from(new_entry),
                };
                if src == dst {
                    return Ok(true);
                }
                if dst.exists() {
                    if same_content(&src, &dst)? {
                        std::fs::remove_file(&src)?;
                        *entry = PathBuf::from(new_entry);
                        return Ok(true);
                    }
                    if !force {
                        return Ok(false);
                    }
                }
                ensure_parent(&dst)?;
                std::fs::rename(&src, &dst).or_else(|_| {
                    std::fs::copy(&src, &dst)?;
                    std::fs::remove_file(&src)
                })?;
                *entry = PathBuf::from(new_entry);
                Ok(true)
            }
            RomPath::Archive { archive, entry } => {
                let renamed = archive.rename_entry(entry, new_entry, force)?;
                if renamed {
                    *entry = new_entry.to_string();
                }
                Ok(renamed)
            }
            RomPath::Virtual { entry } => {
                *entry = new_entry.to_string();
                Ok(true)
            }
        }
    }

    /// Remove the physical target and degrade to a virtual path. A
    /// no-op `true` for paths that are already virtual.
    pub fn delete(&mut self) -> Result<bool> {
        match self {
            RomPath::File { entry, basedir } => {
                let path = match basedir {
                    Some(base) => base.join(&*entry),
                    None => entry.clone(),
                };
                std::fs::remove_file(path)?;
                let entry = entry.to_string_lossy().into_owned();
                *self = RomPath::Virtual { entry };
                Ok(true)
            }
            RomPath::Archive { archive, entry } => {
                archive.delete(entry)?;
                let entry = entry.clone();
                *self = RomPath::Virtual { entry };
                Ok(true)
            }
            RomPath::Virtual { .. } => Ok(true),
        }
    }
}

impl fmt::Display for RomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomPath::File { entry, .. } => write!(f, "{}", entry.display()),
            RomPath::Archive { archive, entry } => write!(
                f,
                "{}",
                join_archive_path(&archive.relative_path().to_string_lossy(), entry)
            ),
            RomPath::Virtual { entry } => write!(f, "{entry}"),
        }
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn copy_stream(mut reader: impl Read, dst: &Path, len: Option<u64>, offset: u64) -> Result<()> {
    if offset > 0 {
        io::copy(&mut (&mut reader).take(offset), &mut io::sink())?;
    }
    ensure_parent(dst)?;
    let mut out = File::create(dst)?;
    match len {
        Some(limit) => {
            io::copy(&mut reader.take(limit), &mut out)?;
        }
        None => {
            io::copy(&mut reader, &mut out)?;
        }
    }
    Ok(())
}

fn same_content(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a)?;
    let meta_b = std::fs::metadata(b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    let mut ba = [0u8; 8192];
    let mut bb = [0u8; 8192];
    loop {
        let na = fa.read(&mut ba)?;
        let nb = fb.read(&mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn join_and_split_single_char() {
        assert_eq!(join_with("#", "a.zip", "b/c.bin"), "a.zip#b/c.bin");
        assert_eq!(
            split_with("#", "a.zip#b/c.bin"),
            Some(("a.zip".to_string(), "b/c.bin".to_string()))
        );
        assert_eq!(split_with("#", "plain.bin"), None);
    }

    #[test]
    fn join_and_split_bracket_pair() {
        assert_eq!(join_with("[]", "a.zip", "b.bin"), "a.zip[b.bin]");
        assert_eq!(
            split_with("[]", "a.zip[b.bin]"),
            Some(("a.zip".to_string(), "b.bin".to_string()))
        );
    }

    #[test]
    fn default_separator_is_hash() {
        assert_eq!(archive_separator(), "#");
    }

    #[test]
    fn file_entry_must_be_relative() {
        assert!(RomPath::file("sub/a.bin", None).is_ok());
        assert!(RomPath::file("/abs/a.bin", None).is_err());
    }

    #[test]
    fn basename_takes_last_segment() {
        let p = RomPath::file("dir/sub/a.bin", None).unwrap();
        assert_eq!(p.basename(), "a.bin");
        let v = RomPath::catalog("dir\\b.bin");
        assert_eq!(v.basename(), "b.bin");
    }

    #[test]
    fn copy_window_honors_offset_and_len() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("src.bin"), b"0123456789").unwrap();

        let path = RomPath::file("src.bin", Some(dir.path().to_path_buf())).unwrap();
        let dst = dir.path().join("window.bin");
        assert!(path.copy(&dst, Some(4), 2, false, false).unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"2345");

        // Existing target without force is refused.
        assert!(!path.copy(&dst, None, 0, false, false).unwrap());
        assert!(path.copy(&dst, None, 0, true, false).unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"0123456789");
    }

    #[test]
    fn rename_to_current_name_is_noop() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"data").unwrap();

        let mut path = RomPath::file("a.bin", Some(dir.path().to_path_buf())).unwrap();
        assert!(path.rename("a.bin", false).unwrap());
        assert!(dir.path().join("a.bin").is_file());
    }

    #[test]
    fn rename_onto_identical_target_drops_source() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"data").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"data").unwrap();

        let mut path = RomPath::file("a.bin", Some(dir.path().to_path_buf())).unwrap();
        assert!(path.rename("b.bin", false).unwrap());
        assert!(!dir.path().join("a.bin").exists());
        assert!(dir.path().join("b.bin").is_file());
        assert_eq!(path.entry(), "b.bin");
    }

    #[test]
    fn rename_onto_differing_target_needs_force() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"aaa").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"bbb").unwrap();

        let mut path = RomPath::file("a.bin", Some(dir.path().to_path_buf())).unwrap();
        assert!(!path.rename("b.bin", false).unwrap());
        assert_eq!(path.entry(), "a.bin");

        assert!(path.rename("b.bin", true).unwrap());
        assert_eq!(std::fs::read(dir.path().join("b.bin")).unwrap(), b"aaa");
    }

    #[test]
    fn delete_degrades_to_virtual() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"data").unwrap();

        let mut path = RomPath::file("a.bin", Some(dir.path().to_path_buf())).unwrap();
        assert!(path.delete().unwrap());
        assert!(path.is_virtual());
        assert_eq!(path.entry(), "a.bin");
        assert!(!dir.path().join("a.bin").exists());

        // Virtual deletes are no-ops that still succeed.
        assert!(path.delete().unwrap());
        let mut f = Vec::new();
        assert!(path.reader().map(|mut r| r.read_to_end(&mut f)).is_err());
        assert!(!path.copy(dir.path().join("out.bin").as_path(), None, 0, true, false).unwrap());
    }
}
