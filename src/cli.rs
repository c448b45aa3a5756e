use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexType {
    Yaml,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "romcellar",
    version,
    about = "DAT-driven ROM collection vault: check, validate, rename, rebuild, repack"
)]
pub struct Cli {
    /// Report rendering
    #[arg(
        short,
        long,
        value_enum,
        default_value_t = OutputMode::Text,
        global = true
    )]
    pub output: OutputMode,

    /// Overwrite existing targets
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Archive path separator, e.g. '#' or '[]'
    #[arg(long, value_name = "SEP", global = true)]
    pub separator: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare a ROM directory against a catalog
    Check {
        dat: PathBuf,
        dir: PathBuf,
        /// Report missing ROMs only
        #[arg(long)]
        missing: bool,
        /// Report extra ROMs only
        #[arg(long)]
        extra: bool,
        /// Report included ROMs only
        #[arg(long)]
        included: bool,
    },

    /// Classify every catalog ROM against a directory
    Validate {
        dat: PathBuf,
        dir: PathBuf,
        /// Root ROM directories accepted by the location check
        /// (defaults to the scanned directory)
        #[arg(long = "rom-dir", value_name = "DIR", action = ArgAction::Append)]
        rom_dirs: Vec<PathBuf>,
    },

    /// Write or refresh the persistent index of a directory
    Index {
        dir: PathBuf,
        /// Index file (defaults to <dir>/.index)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = IndexType::Yaml)]
        format: IndexType,
        /// Strip the first N path components from stored paths
        #[arg(long, value_name = "N")]
        pathstrip: Option<usize>,
        /// Refresh an existing index instead of rebuilding it
        #[arg(long)]
        update: bool,
        /// During --update, also take in newly appeared ROMs
        #[arg(long)]
        add: bool,
    },

    /// Rename ROMs to their catalog names
    Rename { dat: PathBuf, dir: PathBuf },

    /// Build per-game archives from the vault
    Rebuild {
        dat: PathBuf,
        src: PathBuf,
        dest: PathBuf,
        #[arg(long, default_value = "zip")]
        format: String,
    },

    /// Re-encode archives into another container format
    Repack {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "7z")]
        to: String,
        /// Plan only, mutate nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show embedded-header information for ROM dumps
    Header {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Write a header-stripped copy next to each headered file
        #[arg(long)]
        strip: bool,
    },

    /// Remove ROMs the catalog does not list
    Clean {
        dat: PathBuf,
        dir: PathBuf,
        /// Copy removed ROMs here before deleting
        #[arg(long, value_name = "DIR")]
        trash: Option<PathBuf>,
    },
}
