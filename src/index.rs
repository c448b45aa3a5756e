//! Index persistence: dump a vault snapshot to YAML or JSON, load it
//! back with out-of-sync detection, and refresh it incrementally.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{self, Archive};
use crate::checksum::{ChecksumKind, ChecksumSet};
use crate::error::{Error, Result};
use crate::rom::Rom;
use crate::rompath::{self, RomPath};
use crate::vault::Vault;

/// One persisted ROM: hex digests, content size, optional header
/// offset, and the storage mtime at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub crc32: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offset: Option<u64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Yaml,
    Json,
}

/// Storage mtimes are persisted and compared in this fixed rendering;
/// string equality sidesteps sub-second precision drift.
pub fn format_timestamp(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%F %T%.9f %Z").to_string()
}

/// Serialize the vault's `index()` snapshot. `pathstrip` removes the
/// first N path components of every key; keys stripped to nothing are
/// handed to `on_skipped` and omitted.
pub fn save(
    vault: &Vault,
    dst: &Path,
    format: IndexFormat,
    pathstrip: Option<usize>,
    mut on_skipped: impl FnMut(&str),
) -> Result<()> {
    let snapshot = vault.index()?;
    let mut entries: BTreeMap<String, IndexEntry> = BTreeMap::new();
    for (key, entry) in snapshot {
        let kept = match pathstrip {
            Some(n) if n > 0 => strip_path(&key, n),
            _ => Some(key.clone()),
        };
        match kept {
            Some(stripped) => {
                entries.insert(stripped, entry);
            }
            None => on_skipped(&key),
        }
    }

    let body = match format {
        IndexFormat::Yaml => {
            let yaml = serde_yml::to_string(&entries)
                .map_err(|e| Error::processing(format!("serializing index: {e}")))?;
            format!("---\n{yaml}")
        }
        IndexFormat::Json => serde_json::to_string_pretty(&entries)
            .map_err(|e| Error::processing(format!("serializing index: {e}")))?,
    };
    fs::write(dst, body)?;
    Ok(())
}

/// Load an index into a vault. For every entry whose storage mtime
/// disagrees with the recorded timestamp (or whose storage is gone),
/// `out_of_sync` decides whether to keep it; refused ROMs are returned
/// separately.
pub fn load(
    file: &Path,
    mut out_of_sync: impl FnMut(&Rom) -> bool,
) -> Result<(Vault, Vec<Rom>)> {
    let raw = fs::read(file)?;
    let entries = parse_index(&raw)?;
    let base = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    // Entries inside one archive share a single Archive value so
    // archive-level state stays coherent.
    let mut archives: HashMap<String, Archive> = HashMap::new();
    let mut vault = Vault::new();
    let mut rejected = Vec::new();

    for (key, entry) in entries {
        let rom = reconstruct(&key, &entry, &base, &mut archives)?;
        let in_sync = rom
            .path()
            .file_path()
            .and_then(|p| fs::metadata(p).ok())
            .and_then(|m| m.modified().ok())
            .map(|t| format_timestamp(t) == entry.timestamp)
            .unwrap_or(false);
        if in_sync || out_of_sync(&rom) {
            vault.add(rom);
        } else {
            rejected.push(rom);
        }
    }

    Ok((vault, rejected))
}

pub(crate) fn parse_index(raw: &[u8]) -> Result<BTreeMap<String, IndexEntry>> {
    if raw.starts_with(b"---") {
        return serde_yml::from_slice(raw).map_err(|e| Error::load(format!("bad YAML index: {e}")));
    }
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => {
            serde_json::from_slice(raw).map_err(|e| Error::load(format!("bad JSON index: {e}")))
        }
        _ => Err(Error::load("index is neither YAML nor JSON")),
    }
}

fn reconstruct(
    key: &str,
    entry: &IndexEntry,
    base: &Path,
    archives: &mut HashMap<String, Archive>,
) -> Result<Rom> {
    let mut checksums = ChecksumSet::new();
    if let Some(value) = &entry.sha256 {
        checksums.set(ChecksumKind::Sha256, value)?;
    }
    if let Some(value) = &entry.sha1 {
        checksums.set(ChecksumKind::Sha1, value)?;
    }
    if let Some(value) = &entry.md5 {
        checksums.set(ChecksumKind::Md5, value)?;
    }
    if let Some(value) = &entry.crc32 {
        checksums.set(ChecksumKind::Crc32, value)?;
    }

    let path = match parse_key(key) {
        Some((file, inner)) => {
            let container = match archives.get(&file) {
                Some(existing) => existing.clone(),
                None => {
                    let created =
                        Archive::with_basedir(base.join(&file), Some(base.to_path_buf()))
                            .ok_or_else(|| Error::ArchiverNotFound(base.join(&file)))?;
                    archives.insert(file.clone(), created.clone());
                    created
                }
            };
            RomPath::in_archive(container, inner)
        }
        None => RomPath::file(key, Some(base.to_path_buf()))?,
    };

    Ok(Rom::new(path, Some(entry.size), entry.offset, checksums))
}

/// Recognize the archive-path grammar in an index key. With the
/// default separator this is a plain split; when the separator
/// coincides with the path separator, the archive file is found by
/// extension (the first component carrying one).
fn parse_key(key: &str) -> Option<(String, String)> {
    let separator = rompath::archive_separator();
    if separator != "/" {
        let (file, entry) = rompath::split_archive_path(key)?;
        if archive::is_archive_name(&file) {
            return Some((file, entry));
        }
        return None;
    }
    let components: Vec<&str> = key.split('/').collect();
    let pos = components
        .iter()
        .position(|c| archive::is_archive_name(c))?;
    if pos + 1 >= components.len() {
        return None;
    }
    Some((
        components[..=pos].join("/"),
        components[pos + 1..].join("/"),
    ))
}

fn strip_components(path: &str, n: usize) -> Option<String> {
    let components: Vec<&str> = path.split('/').collect();
    if components.len() <= n {
        return None;
    }
    Some(components[n..].join("/"))
}

fn strip_path(key: &str, n: usize) -> Option<String> {
    let separator = rompath::archive_separator();
    if separator != "/" {
        if let Some((file, entry)) = rompath::split_archive_path(key) {
            if archive::is_archive_name(&file) {
                let file = strip_components(&file, n)?;
                return Some(rompath::join_archive_path(&file, &entry));
            }
        }
        return strip_components(key, n);
    }
    // Separator equals the path separator: find the archive file by
    // extension, strip on the file side, re-join the entry beyond it.
    let components: Vec<&str> = key.split('/').collect();
    match components.iter().position(|c| archive::is_archive_name(c)) {
        Some(pos) if pos + 1 < components.len() => {
            let file = strip_components(&components[..=pos].join("/"), n)?;
            Some(format!("{file}/{}", components[pos + 1..].join("/")))
        }
        _ => strip_components(key, n),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Serialize)]
pub struct IndexChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// Refresh an index in place. Out-of-sync storages are re-examined:
/// vanished files report REMOVE, changed archives are rescanned entry
/// by entry, changed single files are recomputed. With `adding`, new
/// archive entries and new files under the index directory are taken
/// in as ADD; without it they are discarded. The file is rewritten
/// only when something changed.
pub fn update(index_file: &Path, adding: bool, format: IndexFormat) -> Result<Vec<IndexChange>> {
    let (mut vault, stale) = load(index_file, |_| false)?;
    let base = index_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut changes = Vec::new();

    let mut by_file: BTreeMap<PathBuf, Vec<Rom>> = BTreeMap::new();
    for rom in stale {
        if let Some(file) = rom.path().file_path() {
            by_file.entry(file).or_default().push(rom);
        }
    }

    for (file, old_roms) in by_file {
        if !file.exists() {
            for rom in &old_roms {
                changes.push(IndexChange {
                    path: rom.to_string(),
                    kind: ChangeKind::Remove,
                });
            }
            continue;
        }

        let relative = file.strip_prefix(&base).unwrap_or(&file).to_path_buf();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if archive::archive_extension(&name).is_some() {
            let mut fresh = Vault::new();
            fresh.add_from_file(&relative, Some(base.as_path()), &mut |_| true)?;
            let old_entries: Vec<String> = old_roms.iter().map(|r| r.entry()).collect();
            let fresh_entries: HashSet<String> =
                fresh.iter().map(|r| r.entry()).collect();

            for rom in fresh.roms() {
                if old_entries.contains(&rom.entry()) {
                    vault.add(rom.clone());
                    changes.push(IndexChange {
                        path: rom.to_string(),
                        kind: ChangeKind::Update,
                    });
                } else if adding {
                    vault.add(rom.clone());
                    changes.push(IndexChange {
                        path: rom.to_string(),
                        kind: ChangeKind::Add,
                    });
                }
            }
            for old in &old_roms {
                if !fresh_entries.contains(&old.entry()) {
                    changes.push(IndexChange {
                        path: old.to_string(),
                        kind: ChangeKind::Remove,
                    });
                }
            }
        } else {
            let digest = crate::checksum::digest_file(&file)?;
            let path = RomPath::file(&relative, Some(base.clone()))?;
            let rom = Rom::from_digest(path, digest);
            changes.push(IndexChange {
                path: rom.to_string(),
                kind: ChangeKind::Update,
            });
            vault.add(rom);
        }
    }

    if adding {
        let known: HashSet<String> = vault.iter().map(|r| r.to_string()).collect();
        let mut scan = Vault::new();
        scan.add_from_dir(&base, None, |_| true)?;
        for rom in scan.roms() {
            // Never index the index file itself.
            if rom.path().file_path().as_deref() == Some(index_file) {
                continue;
            }
            if !known.contains(&rom.to_string()) {
                changes.push(IndexChange {
                    path: rom.to_string(),
                    kind: ChangeKind::Add,
                });
                vault.add(rom.clone());
            }
        }
    }

    if !changes.is_empty() {
        save(&vault, index_file, format, None, |_| {})?;
    }
    Ok(changes)
}
