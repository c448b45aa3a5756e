//! Repack state-machine scenarios, including failure atomicity.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use romcellar::archive::{self, ArchiveFormat};
use romcellar::error::{Error, Result};

fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let f = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(f);
    for (name, data) in entries {
        zip.start_file::<_, ()>(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Provider whose writer fails after a configured number of entries.
struct FlakyFormat {
    extension: &'static str,
    fail_after: usize,
    writes: AtomicUsize,
}

impl ArchiveFormat for FlakyFormat {
    fn name(&self) -> &str {
        "flaky"
    }

    fn extensions(&self) -> Vec<String> {
        vec![self.extension.to_string()]
    }

    fn mimetypes(&self) -> Vec<String> {
        Vec::new()
    }

    fn writable(&self) -> bool {
        true
    }

    fn list(&self, _file: &Path) -> Result<Vec<String>> {
        Err(Error::NotSupported("list"))
    }

    fn each(
        &self,
        _file: &Path,
        _f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>,
    ) -> Result<()> {
        Err(Error::NotSupported("each"))
    }

    fn reader(&self, _file: &Path, _entry: &str) -> Result<Box<dyn Read>> {
        Err(Error::NotSupported("read"))
    }

    fn write(&self, file: &Path, _entry: &str, data: &mut dyn Read) -> Result<()> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if done + 1 >= self.fail_after {
            return Err(Error::processing("simulated device full"));
        }
        let mut sink = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)?;
        std::io::copy(data, &mut sink)?;
        Ok(())
    }
}

#[test]
fn dry_run_plans_without_mutating() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("foo.zip");
    make_zip(&source, &[("a", b"aa"), ("b", b"bb")]);
    let before = std::fs::read(&source).unwrap();

    assert!(archive::repack(&source, "7z", true).unwrap());

    assert_eq!(std::fs::read(&source).unwrap(), before);
    assert!(!dir.path().join("foo.7z").exists());
}

#[test]
fn existing_destination_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("foo.zip");
    make_zip(&source, &[("a", b"aa")]);
    std::fs::write(dir.path().join("foo.7z"), b"already here").unwrap();

    let err = archive::repack(&source, "7z", false).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert!(source.exists());
}

#[test]
fn failed_repack_rolls_back_completely() {
    archive::register(Arc::new(FlakyFormat {
        extension: "flaky",
        fail_after: 2,
        writes: AtomicUsize::new(0),
    }));

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("bar.zip");
    make_zip(&source, &[("a", b"aa"), ("b", b"bb")]);
    let before = std::fs::read(&source).unwrap();

    // Second entry write fails; the call reports failure, the source
    // survives byte for byte, and no destination remains.
    assert!(!archive::repack(&source, "flaky", false).unwrap());
    assert_eq!(std::fs::read(&source).unwrap(), before);
    assert!(!dir.path().join("bar.flaky").exists());

    // No stash or staging files left behind either.
    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "bar.zip")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn same_name_repack_goes_through_a_stash() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("baz.zip");
    make_zip(&source, &[("keep.bin", b"payload")]);

    assert!(archive::repack(&source, "zip", false).unwrap());

    // The archive was rebuilt under its own name with the same content.
    let format = archive::by_extension("zip").unwrap();
    assert_eq!(format.list(&source).unwrap(), vec!["keep.bin"]);
    let mut out = Vec::new();
    format
        .reader(&source, "keep.bin")
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"payload");

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "baz.zip")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
