//! Built-in provider over the in-process `zip` crate.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read};
use std::path::Path;

use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::Result;

use super::{temp_sibling, ArchiveFormat};

pub struct ZipFormat;

impl ZipFormat {
    pub fn new() -> Self {
        ZipFormat
    }
}

impl Default for ZipFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFormat for ZipFormat {
    fn name(&self) -> &str {
        "zip"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["zip".to_string()]
    }

    fn mimetypes(&self) -> Vec<String> {
        vec!["application/zip".to_string()]
    }

    fn writable(&self) -> bool {
        true
    }

    fn list(&self, file: &Path) -> Result<Vec<String>> {
        let f = File::open(file)?;
        let mut zip = ZipArchive::new(f)?;
        let mut out = Vec::new();
        for i in 0..zip.len() {
            let entry = zip.by_index(i)?;
            if entry.is_file() {
                out.push(entry.name().to_string());
            }
        }
        Ok(out)
    }

    fn each(
        &self,
        file: &Path,
        f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>,
    ) -> Result<()> {
        let fh = File::open(file)?;
        let mut zip = ZipArchive::new(fh)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if !entry.is_file() {
                continue;
            }
            let name = entry.name().to_string();
            if !f(&name, &mut entry)? {
                break;
            }
        }
        Ok(())
    }

    fn reader(&self, file: &Path, entry: &str) -> Result<Box<dyn Read>> {
        let fh = File::open(file)?;
        let mut zip = ZipArchive::new(fh)?;
        let mut ef = zip.by_name(entry)?;
        let mut buf = Vec::with_capacity(ef.size() as usize);
        ef.read_to_end(&mut buf)?;
        Ok(Box::new(Cursor::new(buf)))
    }

    fn write(&self, file: &Path, entry: &str, data: &mut dyn Read) -> Result<()> {
        let append = file.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let mut zip = if append {
            let fh = OpenOptions::new().read(true).write(true).open(file)?;
            ZipWriter::new_append(fh)?
        } else {
            ZipWriter::new(File::create(file)?)
        };
        zip.start_file::<_, ()>(entry, FileOptions::default())?;
        io::copy(data, &mut zip)?;
        zip.finish()?;
        Ok(())
    }

    fn delete(&self, file: &Path, entry: &str) -> Result<()> {
        // Rebuild without the entry, raw-copying the kept ones so their
        // compressed payloads survive untouched.
        let staging = temp_sibling(file, ".delete-")?;
        let rebuilt = (|| -> Result<()> {
            let fh = File::open(file)?;
            let mut zip = ZipArchive::new(fh)?;
            let mut out = ZipWriter::new(File::create(&staging)?);
            for i in 0..zip.len() {
                let kept = zip.by_index_raw(i)?;
                if !kept.is_file() || kept.name() == entry {
                    continue;
                }
                out.raw_copy_file(kept)?;
            }
            out.finish()?;
            Ok(())
        })();
        match rebuilt {
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
}
