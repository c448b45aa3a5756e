//! Rebuilding per-game archives from scattered, misnamed sources.

use std::fs;
use std::io::Read;

use romcellar::dat::Dat;
use romcellar::storage;
use romcellar::vault::Vault;

#[test]
fn rebuild_assembles_games_from_partial_sources() {
    // Content identities computed on the fly so the DAT matches.
    let abc = romcellar::checksum::digest_reader(std::io::Cursor::new(b"abc")).unwrap();
    let defg = romcellar::checksum::digest_reader(std::io::Cursor::new(b"defg")).unwrap();

    let text = format!(
        r#"clrmamepro ( name set )
game (
	name "G"
	rom ( name "a.bin" size 3 sha1 {} )
	rom ( name "b.bin" size 4 sha1 {} )
)
"#,
        abc.checksums.sha1.as_deref().unwrap(),
        defg.checksums.sha1.as_deref().unwrap(),
    );
    let dat = Dat::parse_str(&text).unwrap();

    // One source is correctly named, the other is not; rebuild matches
    // by content, not by name.
    let dump = tempfile::tempdir().unwrap();
    fs::write(dump.path().join("a.bin"), b"abc").unwrap();
    fs::write(dump.path().join("something-else"), b"defg").unwrap();
    let mut vault = Vault::new();
    vault.add_from_dir(dump.path(), None, |_| true).unwrap();

    let out = tempfile::tempdir().unwrap();
    storage::rebuild(out.path(), &dat, &vault, "zip", |_| true).unwrap();

    let archive = out.path().join("G.zip");
    assert!(archive.is_file());
    assert!(!out.path().join(".roms").exists());

    let format = romcellar::archive::by_extension("zip").unwrap();
    let mut entries = format.list(&archive).unwrap();
    entries.sort();
    assert_eq!(entries, vec!["a.bin", "b.bin"]);

    let mut content = Vec::new();
    format
        .reader(&archive, "a.bin")
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    assert_eq!(content, b"abc");

    content.clear();
    format
        .reader(&archive, "b.bin")
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    assert_eq!(content, b"defg");
}

#[test]
fn rebuild_skips_unmatched_content() {
    let abc = romcellar::checksum::digest_reader(std::io::Cursor::new(b"abc")).unwrap();
    let text = format!(
        r#"clrmamepro ( name set )
game (
	name "Partial"
	rom ( name "have.bin" size 3 sha1 {} )
	rom ( name "missing.bin" size 5 sha1 da39a3ee5e6b4b0d3255bfef95601890afd80709 )
)
"#,
        abc.checksums.sha1.as_deref().unwrap(),
    );
    let dat = Dat::parse_str(&text).unwrap();

    let dump = tempfile::tempdir().unwrap();
    fs::write(dump.path().join("x.bin"), b"abc").unwrap();
    let mut vault = Vault::new();
    vault.add_from_dir(dump.path(), None, |_| true).unwrap();

    let out = tempfile::tempdir().unwrap();
    storage::rebuild(out.path(), &dat, &vault, "zip", |_| true).unwrap();

    let format = romcellar::archive::by_extension("zip").unwrap();
    let entries = format.list(&out.path().join("Partial.zip")).unwrap();
    assert_eq!(entries, vec!["have.bin"]);
}
