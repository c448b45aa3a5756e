//! Format-agnostic archive layer: a pluggable provider trait, the
//! process-wide provider registry, the `Archive` value bound to one
//! container file, and the repack state machine.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

pub mod external;
pub mod zip;

pub use external::{ExternalFormat, ListCommand, ToolCommand};
pub use zip::ZipFormat;

/// Contract every archive back-end satisfies. Operations a provider
/// cannot do natively either return `Error::NotSupported` or fall back
/// to the staged emulations below.
pub trait ArchiveFormat: Send + Sync {
    fn name(&self) -> &str;

    /// Recognized filename extensions, lowercase, without the dot.
    fn extensions(&self) -> Vec<String>;

    fn mimetypes(&self) -> Vec<String>;

    fn writable(&self) -> bool {
        false
    }

    /// Entry names in archive order, files only.
    fn list(&self, file: &Path) -> Result<Vec<String>>;

    /// Stream every entry through the callback. The callback returns
    /// `false` to stop early (cooperative cancellation).
    fn each(
        &self,
        file: &Path,
        f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>,
    ) -> Result<()>;

    fn reader(&self, file: &Path, entry: &str) -> Result<Box<dyn Read>>;

    fn write(&self, _file: &Path, _entry: &str, _data: &mut dyn Read) -> Result<()> {
        Err(Error::NotSupported("write"))
    }

    /// Remove one entry. The default emulation rebuilds the archive
    /// without the entry in a `<file>.delete-<random>` staging file and
    /// atomically renames it over the original.
    fn delete(&self, file: &Path, entry: &str) -> Result<()> {
        emulate_delete(self, file, entry)
    }

    /// Rename one entry. The default is copy then delete; providers
    /// with a native rename override this.
    fn rename_entry(&self, file: &Path, from: &str, to: &str) -> Result<()> {
        emulate_rename(self, file, from, to)
    }
}

/// Staged delete for providers without a native one. The staging file
/// is always removed on the failure path.
pub fn emulate_delete<F: ArchiveFormat + ?Sized>(
    format: &F,
    file: &Path,
    entry: &str,
) -> Result<()> {
    if !format.writable() {
        return Err(Error::NotSupported("delete"));
    }
    let staging = temp_sibling(file, ".delete-")?;
    log::debug!("staged delete of {entry:?} via {}", staging.display());
    let built = format.each(file, &mut |name, reader| {
        if name != entry {
            format.write(&staging, name, reader)?;
        }
        Ok(true)
    });
    match built {
        Ok(()) => {
            std::fs::rename(&staging, file)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&staging);
            Err(e)
        }
    }
}

/// Copy-then-delete rename for providers without a native one.
pub fn emulate_rename<F: ArchiveFormat + ?Sized>(
    format: &F,
    file: &Path,
    from: &str,
    to: &str,
) -> Result<()> {
    let mut reader = format.reader(file, from)?;
    format.write(file, to, &mut reader)?;
    format.delete(file, from)
}

/// Reserve a sibling temporary name `<file><tag><10 random chars>`.
/// The reserved file is removed; callers create it themselves.
pub(crate) fn temp_sibling(file: &Path, tag: &str) -> Result<PathBuf> {
    let parent = file.parent().filter(|p| !p.as_os_str().is_empty());
    let parent = parent.unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("archive");
    let reserved = tempfile::Builder::new()
        .prefix(&format!("{name}{tag}"))
        .rand_bytes(10)
        .tempfile_in(parent)?;
    let path = reserved.into_temp_path();
    let result = path.to_path_buf();
    path.close()?;
    Ok(result)
}

#[derive(Default)]
struct Registry {
    by_ext: HashMap<String, Arc<dyn ArchiveFormat>>,
    by_mime: HashMap<String, Arc<dyn ArchiveFormat>>,
}

impl Registry {
    fn install(&mut self, format: Arc<dyn ArchiveFormat>) {
        for ext in format.extensions() {
            let ext = ext.to_ascii_lowercase();
            if let Some(previous) = self.by_ext.get(&ext) {
                log::warn!(
                    "archiver {} overrides {} for extension .{ext}",
                    format.name(),
                    previous.name()
                );
            }
            self.by_ext.insert(ext, format.clone());
        }
        for mime in format.mimetypes() {
            if let Some(previous) = self.by_mime.get(&mime) {
                log::warn!(
                    "archiver {} overrides {} for mimetype {mime}",
                    format.name(),
                    previous.name()
                );
            }
            self.by_mime.insert(mime, format.clone());
        }
    }
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.install(Arc::new(ZipFormat::new()));
    if which::which("7z").is_err() {
        log::debug!("7z not found in PATH; .7z operations will fail until it is installed");
    }
    registry.install(Arc::new(ExternalFormat::seven_zip()));
    RwLock::new(registry)
});

/// Register a provider. Later registrations override earlier ones for
/// the extensions and mimetypes they share, with a warning.
pub fn register(format: Arc<dyn ArchiveFormat>) {
    REGISTRY.write().unwrap().install(format);
}

pub fn by_extension(ext: &str) -> Option<Arc<dyn ArchiveFormat>> {
    REGISTRY
        .read()
        .unwrap()
        .by_ext
        .get(&ext.to_ascii_lowercase())
        .cloned()
}

pub fn by_mimetype(mime: &str) -> Option<Arc<dyn ArchiveFormat>> {
    REGISTRY.read().unwrap().by_mime.get(mime).cloned()
}

/// The registered extension `name` carries, preferring the longest
/// suffix so doubled extensions resolve to the right provider.
pub fn archive_extension(name: &str) -> Option<String> {
    let lowered = name.to_ascii_lowercase();
    let registry = REGISTRY.read().unwrap();
    let mut best: Option<String> = None;
    for ext in registry.by_ext.keys() {
        if lowered.len() > ext.len() && lowered.ends_with(&format!(".{ext}")) {
            let longer = best.as_ref().map_or(true, |b| ext.len() > b.len());
            if longer {
                best = Some(ext.clone());
            }
        }
    }
    best
}

/// Whether a file name looks like a registered archive.
pub fn is_archive_name(name: &str) -> bool {
    archive_extension(name).is_some()
}

/// Resolve the provider for a file: longest-suffix extension match
/// first, then content sniffing to a mimetype.
pub fn for_file(path: &Path) -> Option<Arc<dyn ArchiveFormat>> {
    let name = path.file_name()?.to_str()?;
    if let Some(ext) = archive_extension(name) {
        return by_extension(&ext);
    }
    let mime = sniff(path)?;
    by_mimetype(&mime)
}

/// Map well-known magic bytes to a mimetype.
fn sniff(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut magic = [0u8; 8];
    let n = file.read(&mut magic).ok()?;
    if n >= 4 && &magic[..4] == b"PK\x03\x04" {
        return Some("application/zip".to_string());
    }
    if n >= 6 && &magic[..6] == b"7z\xbc\xaf\x27\x1c" {
        return Some("application/x-7z-compressed".to_string());
    }
    None
}

/// One container file bound to its provider. Cloning shares the
/// provider; the entry set is always read from disk.
#[derive(Clone)]
pub struct Archive {
    path: PathBuf,
    basedir: Option<PathBuf>,
    format: Arc<dyn ArchiveFormat>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("format", &self.format.name())
            .finish()
    }
}

impl Archive {
    /// Bind `path` to the provider its name (or content) resolves to.
    pub fn for_file(path: impl Into<PathBuf>) -> Option<Archive> {
        Self::with_basedir(path, None)
    }

    pub fn with_basedir(path: impl Into<PathBuf>, basedir: Option<PathBuf>) -> Option<Archive> {
        let path = path.into();
        let format = for_file(&path)?;
        Some(Archive {
            path,
            basedir,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the ingestion base directory, for display and
    /// index keys.
    pub fn relative_path(&self) -> &Path {
        match &self.basedir {
            Some(base) => self.path.strip_prefix(base).unwrap_or(&self.path),
            None => &self.path,
        }
    }

    pub fn format(&self) -> &Arc<dyn ArchiveFormat> {
        &self.format
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn entries(&self) -> Result<Vec<String>> {
        self.format.list(&self.path)
    }

    pub fn include(&self, entry: &str) -> Result<bool> {
        Ok(self.entries()?.iter().any(|e| e == entry))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn each(&self, f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>) -> Result<()> {
        self.format.each(&self.path, f)
    }

    pub fn reader(&self, entry: &str) -> Result<Box<dyn Read>> {
        self.format.reader(&self.path, entry)
    }

    pub fn write(&self, entry: &str, data: &mut dyn Read) -> Result<()> {
        self.format.write(&self.path, entry, data)
    }

    /// Remove one entry; an archive left with zero entries is unlinked.
    pub fn delete(&self, entry: &str) -> Result<()> {
        let entries = self.entries()?;
        if !entries.iter().any(|e| e == entry) {
            return Err(Error::processing(format!(
                "no entry {entry:?} in {}",
                self.path.display()
            )));
        }
        if entries.len() == 1 {
            std::fs::remove_file(&self.path)?;
            return Ok(());
        }
        self.format.delete(&self.path, entry)?;
        if self.is_empty().unwrap_or(false) {
            let _ = std::fs::remove_file(&self.path);
        }
        Ok(())
    }

    /// Byte-equal comparison of two entries.
    pub fn same(&self, a: &str, b: &str) -> Result<bool> {
        let mut ra = self.reader(a)?;
        let mut rb = self.reader(b)?;
        let mut ba = [0u8; 8192];
        let mut bb = [0u8; 8192];
        loop {
            let na = read_full(&mut ra, &mut ba)?;
            let nb = read_full(&mut rb, &mut bb)?;
            if na != nb || ba[..na] != bb[..nb] {
                return Ok(false);
            }
            if na == 0 {
                return Ok(true);
            }
        }
    }

    /// Copy `from` to `to` within the archive. Identical existing
    /// target is a no-op `true`; a differing one without `force` is
    /// `false`.
    pub fn copy_entry(&self, from: &str, to: &str, force: bool) -> Result<bool> {
        if from == to {
            return Ok(true);
        }
        if self.include(to)? {
            if self.same(from, to)? {
                return Ok(true);
            }
            if !force {
                return Ok(false);
            }
            self.format.delete(&self.path, to)?;
        }
        let mut reader = self.reader(from)?;
        self.format.write(&self.path, to, &mut reader)?;
        Ok(true)
    }

    pub fn rename_entry(&self, from: &str, to: &str, force: bool) -> Result<bool> {
        if from == to {
            return Ok(true);
        }
        if self.include(to)? {
            if self.same(from, to)? {
                self.delete(from)?;
                return Ok(true);
            }
            if !force {
                return Ok(false);
            }
            self.format.delete(&self.path, to)?;
        }
        self.format.rename_entry(&self.path, from, to)?;
        Ok(true)
    }
}

/// Re-encode an archive's entries into another container format.
///
/// When source and destination names collide the source is stashed
/// under a random sibling name first; any failure rolls the filesystem
/// back to the pre-call state. `dryrun` performs the planning steps
/// only and mutates nothing.
pub fn repack(file: &Path, to_type: &str, dryrun: bool) -> Result<bool> {
    let source_format =
        for_file(file).ok_or_else(|| Error::ArchiverNotFound(file.to_path_buf()))?;
    let destination = file.with_extension(to_type);
    let destination_format = by_extension(to_type)
        .ok_or_else(|| Error::ArchiverNotFound(destination.clone()))?;

    let same_name = destination == *file;
    if !same_name && destination.exists() {
        return Err(Error::AlreadyExists(destination));
    }
    if dryrun {
        return Ok(true);
    }

    let stash = if same_name {
        let stash = temp_sibling(file, ".")?;
        std::fs::rename(file, &stash)?;
        Some(stash)
    } else {
        None
    };
    let source: &Path = stash.as_deref().unwrap_or(file);

    let copied = source_format.each(source, &mut |entry, reader| {
        destination_format.write(&destination, entry, reader)?;
        Ok(true)
    });

    match copied {
        Ok(()) => {
            std::fs::remove_file(source)?;
            Ok(true)
        }
        Err(e) => {
            log::warn!("repack of {} failed: {e}", file.display());
            if destination != *source && destination.exists() {
                let _ = std::fs::remove_file(&destination);
            }
            if let Some(stash) = stash {
                let _ = std::fs::rename(&stash, file);
            }
            Ok(false)
        }
    }
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    loop {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(filled);
        }
        filled += n;
        if filled == buf.len() {
            return Ok(filled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_extension() {
        assert_eq!(by_extension("zip").unwrap().name(), "zip");
        assert_eq!(by_extension("ZIP").unwrap().name(), "zip");
        assert_eq!(by_extension("7z").unwrap().name(), "7z");
        assert!(by_extension("rar").is_none());
    }

    #[test]
    fn for_file_prefers_extension() {
        assert_eq!(
            for_file(Path::new("games/foo.zip")).unwrap().name(),
            "zip"
        );
        assert_eq!(for_file(Path::new("foo.7z")).unwrap().name(), "7z");
        assert!(for_file(Path::new("/nonexistent/foo.bin")).is_none());
    }

    #[test]
    fn for_file_sniffs_content() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mystery.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"PK\x03\x04rest-of-zip").unwrap();
        drop(f);
        assert_eq!(for_file(&path).unwrap().name(), "zip");
    }

    #[test]
    fn archive_extension_is_suffix_only() {
        assert_eq!(archive_extension("a.zip").as_deref(), Some("zip"));
        assert_eq!(archive_extension("a.tar.zip").as_deref(), Some("zip"));
        assert!(archive_extension("zip").is_none());
        assert!(archive_extension("a.bin").is_none());
    }

    #[test]
    fn later_registration_wins() {
        struct Stub(&'static str);

        impl ArchiveFormat for Stub {
            fn name(&self) -> &str {
                self.0
            }
            fn extensions(&self) -> Vec<String> {
                vec!["stubext".to_string()]
            }
            fn mimetypes(&self) -> Vec<String> {
                Vec::new()
            }
            fn list(&self, _file: &Path) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
            fn each(
                &self,
                _file: &Path,
                _f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>,
            ) -> Result<()> {
                Ok(())
            }
            fn reader(&self, _file: &Path, _entry: &str) -> Result<Box<dyn Read>> {
                Err(Error::NotSupported("read"))
            }
        }

        register(Arc::new(Stub("first")));
        register(Arc::new(Stub("second")));
        assert_eq!(by_extension("stubext").unwrap().name(), "second");
    }

    #[test]
    fn temp_sibling_is_fresh_and_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo.zip");
        let sibling = temp_sibling(&file, ".delete-").unwrap();
        assert!(!sibling.exists());
        let name = sibling.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("foo.zip.delete-"));
        assert_eq!(name.len(), "foo.zip.delete-".len() + 10);
        assert_eq!(sibling.parent(), Some(dir.path()));
    }
}
