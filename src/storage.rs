//! Reconciliation of a vault against a catalog: check, validate,
//! rename, rebuild, clean.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive::{self, Archive};
use crate::dat::{Dat, Game};
use crate::error::{Error, Result};
use crate::events::{CleanEvent, ValidateEvent};
use crate::rom::{Rom, RomPart};
use crate::vault::{Subdir, Vault};

/// Outcome of `check`: the three set-algebra slices.
pub struct CheckReport {
    /// Catalog ROMs the vault does not match.
    pub missing: Vault,
    /// Vault ROMs the catalog does not list.
    pub extra: Vault,
    /// Catalog ROMs the vault matches.
    pub included: Vault,
}

impl CheckReport {
    pub fn perfect(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    /// Included ROM names grouped by owning game, in catalog order.
    pub fn included_by_game<'a>(&self, dat: &'a Dat) -> Vec<(&'a str, Vec<String>)> {
        dat.games()
            .iter()
            .filter_map(|game| {
                let names: Vec<String> = game
                    .roms
                    .iter()
                    .filter(|rom| self.included.contains(rom))
                    .map(|rom| rom.entry())
                    .collect();
                (!names.is_empty()).then_some((game.name.as_str(), names))
            })
            .collect()
    }
}

pub fn check(dat: &Dat, vault: &Vault) -> CheckReport {
    CheckReport {
        missing: dat.vault() - vault,
        extra: vault - dat.vault(),
        included: dat.vault() & vault,
    }
}

/// Per-kind counters returned by `validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidateStats {
    pub validated: usize,
    pub not_found: usize,
    pub missing_duplicate: usize,
    pub name_mismatch: usize,
    pub wrong_place: usize,
}

impl ValidateStats {
    pub fn errors(&self) -> usize {
        self.not_found + self.missing_duplicate + self.name_mismatch + self.wrong_place
    }
}

/// Classify every catalog ROM against the vault. `rom_dirs` is the
/// caller's list of root ROM directories, used by the location check;
/// it is context the vault cannot derive itself.
pub fn validate(
    dat: &Dat,
    vault: &Vault,
    rom_dirs: &[PathBuf],
    mut observer: impl FnMut(ValidateEvent) -> bool,
) -> ValidateStats {
    let mut stats = ValidateStats::default();
    'games: for game in dat.games() {
        if !observer(ValidateEvent::GameStart { game: &game.name }) {
            break;
        }
        let mut errors = 0usize;
        for rom in &game.roms {
            let entry = rom.entry();
            if !observer(ValidateEvent::RomStart {
                game: &game.name,
                rom: &entry,
            }) {
                break 'games;
            }
            let error = classify(dat, vault, game, rom, rom_dirs, &mut stats);
            if error.is_some() {
                errors += 1;
            }
            if !observer(ValidateEvent::RomEnd {
                game: &game.name,
                rom: &entry,
                error: error.as_deref(),
            }) {
                break 'games;
            }
        }
        if !observer(ValidateEvent::GameEnd {
            game: &game.name,
            errors,
            roms: game.roms.len(),
        }) {
            break;
        }
    }
    stats
}

fn classify(
    dat: &Dat,
    vault: &Vault,
    game: &Game,
    rom: &Rom,
    rom_dirs: &[PathBuf],
    stats: &mut ValidateStats,
) -> Option<String> {
    let Some(matches) = vault.match_rom(rom) else {
        stats.not_found += 1;
        return Some("not found".to_string());
    };

    let wanted = rom.name();
    let named: Vec<&Rom> = matches
        .iter()
        .copied()
        .filter(|m| m.name() == wanted)
        .collect();

    if named.is_empty() {
        // The content exists under other names only. When each of those
        // copies is itself a correctly named catalog duplicate, the
        // named copy is simply missing; otherwise someone misnamed it.
        let all_cataloged = matches.iter().all(|m| dat.has_named_rom(&m.name(), m));
        if all_cataloged {
            stats.missing_duplicate += 1;
            return Some("missing duplicate".to_string());
        }
        let mut offenders: Vec<String> = Vec::new();
        for m in &matches {
            let name = m.name();
            if !dat.has_named_rom(&name, m) && !offenders.contains(&name) {
                offenders.push(name);
            }
        }
        stats.name_mismatch += 1;
        return Some(if offenders.len() == 1 {
            format!("name mismatch ({})", offenders[0])
        } else {
            "name mismatch".to_string()
        });
    }

    let in_place = named
        .iter()
        .any(|m| storage_in_place(m, &game.name, rom_dirs));
    if !in_place {
        stats.wrong_place += 1;
        return Some("wrong place".to_string());
    }

    stats.validated += 1;
    None
}

fn storage_in_place(rom: &Rom, game_name: &str, rom_dirs: &[PathBuf]) -> bool {
    let Some(storage) = rom.path().storage() else {
        return false;
    };
    let base = storage
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match archive::archive_extension(&base) {
        Some(ext) => base[..base.len() - ext.len() - 1].to_string(),
        None => base.clone(),
    };
    stem == game_name
        || rom_dirs.iter().any(|dir| {
            *dir == storage
                || dir
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy() == base.as_str())
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameAction {
    Renamed,
    Deleted,
    Kept,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct RenameOutcome {
    pub rom: String,
    pub action: RenameAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

enum Decision {
    Rename(String),
    Delete,
    Keep,
    Skip,
}

/// Rename every vault ROM to its catalog name. Content with several
/// catalog names takes the first name no other vault copy already
/// holds; a copy whose current name is pure surplus is deleted.
/// Decisions are made against the live vault so earlier renames are
/// visible to later ones.
pub fn rename(dat: &Dat, vault: &mut Vault, force: bool) -> Result<Vec<RenameOutcome>> {
    let mut outcomes = Vec::new();

    for i in 0..vault.roms().len() {
        let decision = {
            let rom = &vault.roms()[i];
            match dat.vault().match_rom(rom) {
                None => {
                    log::warn!("no catalog match for {rom}, skipping");
                    Decision::Skip
                }
                Some(matches) => {
                    let current = rom.entry();

                    let mut dat_names: Vec<String> = Vec::new();
                    for m in &matches {
                        let name = m.entry();
                        if !dat_names.contains(&name) {
                            dat_names.push(name);
                        }
                    }

                    if dat_names.len() == 1 {
                        if dat_names[0] == current {
                            Decision::Keep
                        } else {
                            Decision::Rename(dat_names[0].clone())
                        }
                    } else {
                        let mut vault_names: Vec<String> = Vec::new();
                        if let Some(copies) = vault.match_rom(rom) {
                            for copy in copies {
                                let name = copy.entry();
                                if !vault_names.contains(&name) {
                                    vault_names.push(name);
                                }
                            }
                        }

                        let candidate = dat_names
                            .iter()
                            .find(|name| !vault_names.contains(name))
                            .cloned();
                        match candidate {
                            Some(name) => Decision::Rename(name),
                            None => {
                                let surplus = vault_names
                                    .iter()
                                    .any(|name| *name == current && !dat_names.contains(name));
                                if surplus {
                                    Decision::Delete
                                } else {
                                    Decision::Keep
                                }
                            }
                        }
                    }
                }
            }
        };

        let rom = &mut vault.roms_mut()[i];
        let rom_string = rom.to_string();
        match decision {
            Decision::Rename(name) => {
                let renamed = rom.rename(&name, force)?;
                outcomes.push(RenameOutcome {
                    rom: rom_string,
                    action: if renamed {
                        RenameAction::Renamed
                    } else {
                        RenameAction::Kept
                    },
                    new_name: Some(name),
                });
            }
            Decision::Delete => {
                rom.delete()?;
                outcomes.push(RenameOutcome {
                    rom: rom_string,
                    action: RenameAction::Deleted,
                    new_name: None,
                });
            }
            Decision::Keep => outcomes.push(RenameOutcome {
                rom: rom_string,
                action: RenameAction::Kept,
                new_name: None,
            }),
            Decision::Skip => outcomes.push(RenameOutcome {
                rom: rom_string,
                action: RenameAction::Skipped,
                new_name: None,
            }),
        }
    }

    Ok(outcomes)
}

/// Materialize per-game archives under `dest` from whatever the vault
/// holds. Content is staged under `dest/.roms` (content-addressed),
/// matched back per game ROM, and the staging directory removed on
/// completion. Source content the catalog does not list is dropped.
pub fn rebuild(
    dest: &Path,
    dat: &Dat,
    vault: &Vault,
    format: &str,
    mut on_game: impl FnMut(&str) -> bool,
) -> Result<()> {
    archive::by_extension(format)
        .ok_or_else(|| Error::ArchiverNotFound(PathBuf::from(format)))?;

    let staging = dest.join(".roms");
    vault.copy_to(&staging, RomPart::Rom, Subdir::Default, true, false)?;

    let mut staged = Vault::new();
    staged.add_from_dir(&staging, None, |_| true)?;

    let built = (|| -> Result<()> {
        for game in dat.games() {
            if !on_game(&game.name) {
                break;
            }
            let target = dest.join(format!("{}.{format}", game.name));
            let Some(container) = Archive::for_file(&target) else {
                return Err(Error::ArchiverNotFound(target));
            };
            for rom in &game.roms {
                let Some(hits) = staged.match_rom(rom) else {
                    continue;
                };
                let Some(source) = hits.first() else {
                    continue;
                };
                let mut reader = source.path().reader()?;
                container.write(&rom.entry(), &mut reader)?;
            }
        }
        Ok(())
    })();

    std::fs::remove_dir_all(&staging)?;
    built
}

/// Delete every vault ROM the catalog does not list, copying it into
/// `trash` first when one is given. Returns the removed path strings.
pub fn clean(
    dat: &Dat,
    vault: &mut Vault,
    trash: Option<&Path>,
    mut observer: impl FnMut(CleanEvent) -> bool,
) -> Result<Vec<String>> {
    let mut doomed = Vec::new();
    for (i, rom) in vault.roms().iter().enumerate() {
        if rom.path().is_virtual() {
            continue;
        }
        if dat.vault().match_rom(rom).is_none() {
            doomed.push(i);
        }
    }

    let mut removed = Vec::new();
    for i in doomed {
        let rom_string = vault.roms()[i].to_string();
        if let Some(trash_dir) = trash {
            let target = trash_dir.join(vault.roms()[i].name());
            vault.roms()[i].copy(&target, RomPart::All, true, false)?;
            if !observer(CleanEvent::Trashed {
                rom: &rom_string,
                to: trash_dir,
            }) {
                return Ok(removed);
            }
        }
        vault.roms_mut()[i].delete()?;
        removed.push(rom_string.clone());
        if !observer(CleanEvent::Deleted { rom: &rom_string }) {
            break;
        }
    }
    Ok(removed)
}
