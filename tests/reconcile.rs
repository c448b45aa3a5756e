//! End-to-end check/validate scenarios over real directories and DAT
//! files on disk.

use std::fs;

use romcellar::dat::Dat;
use romcellar::events::ValidateEvent;
use romcellar::storage;
use romcellar::vault::Vault;

const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

fn write_dat(dir: &std::path::Path, rom_name: &str) -> std::path::PathBuf {
    let text = format!(
        r#"<?xml version="1.0"?>
<!DOCTYPE datafile PUBLIC "-//Logiqx//DTD ROM Management Datafile//EN" "http://www.logiqx.com/Dats/datafile.dtd">
<datafile>
  <header><name>One Game</name></header>
  <game name="G">
    <rom name="{rom_name}" size="3" sha1="{ABC_SHA1}"/>
  </game>
</datafile>
"#
    );
    let path = dir.join("set.dat");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn check_perfect_match() {
    let dat_dir = tempfile::tempdir().unwrap();
    let dat = Dat::from_path(&write_dat(dat_dir.path(), "a.bin")).unwrap();

    let roms = tempfile::tempdir().unwrap();
    fs::write(roms.path().join("a.bin"), b"abc").unwrap();
    let mut vault = Vault::new();
    vault.add_from_dir(roms.path(), None, |_| true).unwrap();

    let report = storage::check(&dat, &vault);
    assert!(report.perfect());
    assert!(report.missing.is_empty());
    assert!(report.extra.is_empty());
    assert_eq!(
        report.included_by_game(&dat),
        vec![("G", vec!["a.bin".to_string()])]
    );
    // Perfect is equivalent to |included| == |dat.roms|.
    assert_eq!(report.included.len(), dat.roms().len());
}

#[test]
fn validate_name_mismatch_names_the_offender() {
    let dat_dir = tempfile::tempdir().unwrap();
    let dat = Dat::from_path(&write_dat(dat_dir.path(), "a.bin")).unwrap();

    let roms = tempfile::tempdir().unwrap();
    fs::write(roms.path().join("zzz.bin"), b"abc").unwrap();
    let mut vault = Vault::new();
    vault.add_from_dir(roms.path(), None, |_| true).unwrap();

    let mut errors = Vec::new();
    let stats = storage::validate(&dat, &vault, &[roms.path().to_path_buf()], |event| {
        if let ValidateEvent::RomEnd {
            error: Some(error), ..
        } = &event
        {
            errors.push(error.to_string());
        }
        true
    });

    assert_eq!(stats.not_found, 0);
    assert_eq!(stats.missing_duplicate, 0);
    assert_eq!(stats.name_mismatch, 1);
    assert_eq!(stats.wrong_place, 0);
    assert_eq!(errors, vec!["name mismatch (zzz.bin)".to_string()]);
}

#[test]
fn validate_missing_duplicate_when_other_copy_is_cataloged() {
    // Catalog lists the same content twice; only one copy exists.
    let text = format!(
        r#"clrmamepro ( name set )
game (
	name "G"
	rom ( name "a.bin" size 3 sha1 {ABC_SHA1} )
	rom ( name "b.bin" size 3 sha1 {ABC_SHA1} )
)
"#
    );
    let dat = Dat::parse_str(&text).unwrap();

    let roms = tempfile::tempdir().unwrap();
    fs::write(roms.path().join("a.bin"), b"abc").unwrap();
    let mut vault = Vault::new();
    vault.add_from_dir(roms.path(), None, |_| true).unwrap();

    let stats = storage::validate(&dat, &vault, &[roms.path().to_path_buf()], |_| true);
    assert_eq!(stats.validated, 1);
    assert_eq!(stats.missing_duplicate, 1);
    assert_eq!(stats.name_mismatch, 0);
}

#[test]
fn validate_cancels_between_items() {
    let dat_dir = tempfile::tempdir().unwrap();
    let dat = Dat::from_path(&write_dat(dat_dir.path(), "a.bin")).unwrap();
    let vault = Vault::new();

    let mut events = 0usize;
    storage::validate(&dat, &vault, &[], |_| {
        events += 1;
        false
    });
    assert_eq!(events, 1);
}
