//! Progress events emitted by long-running operations.
//!
//! Rendering is the CLI's job; the library only reports what it is doing.
//! Every observer returns `bool`: `true` to continue, `false` to cancel
//! cooperatively. Cancelled operations stop between items and leave no
//! staging or temporary files behind.

use std::path::Path;

/// Emitted while ingesting a directory, glob, or archive.
#[derive(Debug)]
pub enum ScanEvent<'a> {
    /// A plain file was ingested.
    File { path: &'a Path },
    /// An archive entry was ingested.
    Entry { archive: &'a Path, entry: &'a str },
}

/// Emitted by `storage::validate`, one pair per game and per ROM.
#[derive(Debug)]
pub enum ValidateEvent<'a> {
    GameStart {
        game: &'a str,
    },
    RomStart {
        game: &'a str,
        rom: &'a str,
    },
    RomEnd {
        game: &'a str,
        rom: &'a str,
        error: Option<&'a str>,
    },
    GameEnd {
        game: &'a str,
        errors: usize,
        roms: usize,
    },
}

/// Emitted by `storage::clean` for every removed ROM.
#[derive(Debug)]
pub enum CleanEvent<'a> {
    Trashed { rom: &'a str, to: &'a Path },
    Deleted { rom: &'a str },
}
