//! The catalog model: games referencing ROM identities, parsed from
//! either supported DAT dialect.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::checksum::{ChecksumKind, ChecksumSet};
use crate::error::{Error, Result};
use crate::rom::Rom;
use crate::rompath::RomPath;
use crate::vault::Vault;

pub mod clrmamepro;
pub mod logiqx;

/// Catalog header metadata.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub name: String,
    pub region: Option<String>,
}

/// A named set of ROMs representing one title.
#[derive(Debug)]
pub struct Game {
    pub name: String,
    pub description: Option<String>,
    pub cloneof: Option<String>,
    pub roms: Vec<Rom>,
    pub releases: Vec<Release>,
}

/// A parsed catalog: ordered games, a by-name lookup, all ROMs in a
/// vault of virtual paths, and a ROM-to-games reverse lookup.
pub struct Dat {
    meta: DatMeta,
    games: Vec<Game>,
    by_name: HashMap<String, usize>,
    vault: Vault,
    rom_games: HashMap<String, Vec<usize>>,
}

impl Dat {
    /// Assemble a catalog; duplicate game names are a content error.
    pub fn new(meta: DatMeta, games: Vec<Game>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (i, game) in games.iter().enumerate() {
            if by_name.insert(game.name.clone(), i).is_some() {
                return Err(Error::content(format!(
                    "duplicate game name: {}",
                    game.name
                )));
            }
        }

        let mut vault = Vault::new();
        let mut rom_games: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, game) in games.iter().enumerate() {
            for rom in &game.roms {
                rom_games.entry(rom_key(rom)).or_default().push(i);
                vault.add(rom.clone());
            }
        }

        Ok(Dat {
            meta,
            games,
            by_name,
            vault,
            rom_games,
        })
    }

    /// Parse a catalog file, trying Logiqx first, then ClrMamePro.
    pub fn from_path(path: &Path) -> Result<Dat> {
        let text = fs::read_to_string(path)?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Dat> {
        if let Some((meta, games)) = logiqx::parse(text)? {
            return Dat::new(meta, games);
        }
        if let Some((meta, games)) = clrmamepro::parse(text)? {
            return Dat::new(meta, games);
        }
        Err(Error::content("unrecognized DAT format"))
    }

    pub fn meta(&self) -> &DatMeta {
        &self.meta
    }

    pub fn games(&self) -> &[Game] {
        &self.games
    }

    pub fn game(&self, name: &str) -> Option<&Game> {
        self.by_name.get(name).map(|&i| &self.games[i])
    }

    /// All catalog ROMs, content-indexed. Every path is virtual.
    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn roms(&self) -> &[Rom] {
        self.vault.roms()
    }

    /// Games that reference this exact ROM identity.
    pub fn games_with_rom(&self, rom: &Rom) -> Vec<&Game> {
        self.rom_games
            .get(&rom_key(rom))
            .map(|indices| indices.iter().map(|&i| &self.games[i]).collect())
            .unwrap_or_default()
    }

    /// Whether the catalog lists a ROM under `name` whose content
    /// matches `content`.
    pub fn has_named_rom(&self, name: &str, content: &Rom) -> bool {
        self.vault
            .match_rom(content)
            .map(|hits| hits.iter().any(|r| r.name() == name))
            .unwrap_or(false)
    }
}

/// Identity key for the reverse lookup: entry name plus the strongest
/// checksum carried.
fn rom_key(rom: &Rom) -> String {
    let checksum = ChecksumKind::STRENGTH
        .iter()
        .find_map(|k| rom.checksums().get(*k))
        .unwrap_or("");
    format!("{}:{checksum}", rom.entry())
}

/// Catalog entry names use `\` as their separator; normalize to `/`.
pub(crate) fn normalize_entry_name(name: &str) -> String {
    name.split('\\').collect::<Vec<_>>().join("/")
}

/// Build one catalog ROM from parsed fields.
pub(crate) fn catalog_rom(
    name: &str,
    size: Option<u64>,
    crc: Option<&str>,
    md5: Option<&str>,
    sha1: Option<&str>,
    sha256: Option<&str>,
) -> Result<Rom> {
    let mut checksums = ChecksumSet::new();
    if let Some(value) = crc {
        checksums.set(ChecksumKind::Crc32, value)?;
    }
    if let Some(value) = md5 {
        checksums.set(ChecksumKind::Md5, value)?;
    }
    if let Some(value) = sha1 {
        checksums.set(ChecksumKind::Sha1, value)?;
    }
    if let Some(value) = sha256 {
        checksums.set(ChecksumKind::Sha256, value)?;
    }
    Ok(Rom::new(
        RomPath::catalog(normalize_entry_name(name)),
        size,
        None,
        checksums,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIQX: &str = r#"<?xml version="1.0"?>
<!DOCTYPE datafile PUBLIC "-//Logiqx//DTD ROM Management Datafile//EN" "http://www.logiqx.com/Dats/datafile.dtd">
<datafile>
  <header>
    <name>Console Set</name>
    <description>Console Set (parent-clone)</description>
    <version>1.0</version>
    <author>someone</author>
  </header>
  <game name="Game A">
    <release name="Game A" region="USA"/>
    <rom name="a.bin" size="3" crc="352441c2" sha1="a9993e364706816aba3e25717850c26c9cd0d89d"/>
  </game>
  <game name="Game A (Japan)" cloneof="Game A">
    <rom name="aj.bin" size="4" crc="deadbeef"/>
  </game>
</datafile>
"#;

    const CMPRO: &str = r#"clrmamepro (
	name "Console Set"
	description "Console Set (parent-clone)"
	version 1.0
	author someone
)
game (
	name "Game A"
	description "Game A"
	rom ( name a.bin size 3 crc 352441c2 sha1 a9993e364706816aba3e25717850c26c9cd0d89d )
)
game (
	name "Game A (Japan)"
	cloneof "Game A"
	rom ( name aj.bin size 4 crc deadbeef )
)
"#;

    #[test]
    fn dialects_produce_equivalent_models() {
        let a = Dat::parse_str(LOGIQX).unwrap();
        let b = Dat::parse_str(CMPRO).unwrap();

        assert_eq!(a.meta().name.as_deref(), Some("Console Set"));
        assert_eq!(b.meta().name.as_deref(), Some("Console Set"));
        assert_eq!(a.games().len(), b.games().len());
        for (ga, gb) in a.games().iter().zip(b.games().iter()) {
            assert_eq!(ga.name, gb.name);
            assert_eq!(ga.cloneof, gb.cloneof);
            let names_a: Vec<String> = ga.roms.iter().map(|r| r.entry()).collect();
            let names_b: Vec<String> = gb.roms.iter().map(|r| r.entry()).collect();
            assert_eq!(names_a, names_b);
        }
        assert_eq!(a.games()[1].cloneof.as_deref(), Some("Game A"));
        assert_eq!(a.games()[0].releases.len(), 1);
        assert_eq!(a.games()[0].releases[0].region.as_deref(), Some("USA"));
    }

    #[test]
    fn duplicate_game_name_is_content_error() {
        let text = r#"clrmamepro ( name x )
game ( name "Twice" rom ( name a.bin crc 00000001 ) )
game ( name "Twice" rom ( name b.bin crc 00000002 ) )
"#;
        assert!(matches!(
            Dat::parse_str(text),
            Err(Error::Content(_))
        ));
    }

    #[test]
    fn unknown_format_is_content_error() {
        assert!(matches!(
            Dat::parse_str("just some text"),
            Err(Error::Content(_))
        ));
    }

    #[test]
    fn reverse_lookup_finds_owning_games() {
        let dat = Dat::parse_str(LOGIQX).unwrap();
        let rom = &dat.games()[0].roms[0];
        let owners = dat.games_with_rom(rom);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "Game A");
    }

    #[test]
    fn entry_names_split_on_backslash() {
        assert_eq!(normalize_entry_name(r"dir\sub\a.bin"), "dir/sub/a.bin");
        assert_eq!(normalize_entry_name("plain.bin"), "plain.bin");
    }
}
