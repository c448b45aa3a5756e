use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

use romcellar::archive;
use romcellar::cli::{Cli, Command, IndexType, OutputMode};
use romcellar::dat::Dat;
use romcellar::events::ValidateEvent;
use romcellar::headers;
use romcellar::index::{self, IndexFormat};
use romcellar::rom::RomPart;
use romcellar::rompath;
use romcellar::storage;
use romcellar::vault::Vault;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Some(separator) = &cli.separator {
        rompath::set_archive_separator(separator);
    }
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn scan(dir: &Path) -> anyhow::Result<Vault> {
    let mut vault = Vault::new();
    vault
        .add_from_dir(dir, None, |_| true)
        .with_context(|| format!("scanning {}", dir.display()))?;
    Ok(vault)
}

fn load_dat(path: &Path) -> anyhow::Result<Dat> {
    Dat::from_path(path).with_context(|| format!("parsing DAT {}", path.display()))
}

fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Text => text(value),
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputMode::Yaml => print!("---\n{}", serde_yml::to_string(value)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    included: Option<Vec<(String, Vec<String>)>>,
    perfect: bool,
}

#[derive(Serialize)]
struct ValidateSummary {
    stats: storage::ValidateStats,
    errors: Vec<RomError>,
}

#[derive(Serialize)]
struct RomError {
    game: String,
    rom: String,
    error: String,
}

#[derive(Serialize)]
struct HeaderSummary {
    file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header_size: Option<u64>,
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Check {
            dat,
            dir,
            missing,
            extra,
            included,
        } => {
            let dat = load_dat(dat)?;
            let vault = scan(dir)?;
            let report = storage::check(&dat, &vault);

            let all = !(*missing || *extra || *included);
            let summary = CheckSummary {
                missing: (all || *missing)
                    .then(|| report.missing.iter().map(|r| r.entry()).collect()),
                extra: (all || *extra)
                    .then(|| report.extra.iter().map(|r| r.to_string()).collect()),
                included: (all || *included).then(|| {
                    report
                        .included_by_game(&dat)
                        .into_iter()
                        .map(|(game, roms)| (game.to_string(), roms))
                        .collect()
                }),
                perfect: report.perfect(),
            };
            render(cli.output, &summary, |s| {
                if let Some(missing) = &s.missing {
                    for rom in missing {
                        println!("missing: {rom}");
                    }
                }
                if let Some(extra) = &s.extra {
                    for rom in extra {
                        println!("extra: {rom}");
                    }
                }
                if let Some(included) = &s.included {
                    for (game, roms) in included {
                        println!("included: {game} ({})", roms.join(", "));
                    }
                }
                println!("perfect: {}", s.perfect);
            })?;
            Ok(if report.perfect() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }

        Command::Validate { dat, dir, rom_dirs } => {
            let dat = load_dat(dat)?;
            let vault = scan(dir)?;
            let rom_dirs = if rom_dirs.is_empty() {
                vec![dir.clone()]
            } else {
                rom_dirs.clone()
            };

            let mut errors = Vec::new();
            let stats = storage::validate(&dat, &vault, &rom_dirs, |event| {
                if let ValidateEvent::RomEnd {
                    game,
                    rom,
                    error: Some(error),
                } = &event
                {
                    errors.push(RomError {
                        game: (*game).to_string(),
                        rom: (*rom).to_string(),
                        error: (*error).to_string(),
                    });
                }
                true
            });

            let failed = stats.errors() > 0;
            let summary = ValidateSummary { stats, errors };
            render(cli.output, &summary, |s| {
                for e in &s.errors {
                    println!("{}/{}: {}", e.game, e.rom, e.error);
                }
                println!(
                    "validated {} / not found {} / missing duplicate {} / name mismatch {} / wrong place {}",
                    s.stats.validated,
                    s.stats.not_found,
                    s.stats.missing_duplicate,
                    s.stats.name_mismatch,
                    s.stats.wrong_place
                );
            })?;
            Ok(if failed {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Index {
            dir,
            out,
            format,
            pathstrip,
            update,
            add,
        } => {
            let index_format = match format {
                IndexType::Yaml => IndexFormat::Yaml,
                IndexType::Json => IndexFormat::Json,
            };
            let index_file = out.clone().unwrap_or_else(|| dir.join(".index"));

            if *update {
                let changes = index::update(&index_file, *add, index_format)
                    .with_context(|| format!("updating {}", index_file.display()))?;
                render(cli.output, &changes, |changes| {
                    for change in changes {
                        println!("{:?}: {}", change.kind, change.path);
                    }
                    println!("{} change(s)", changes.len());
                })?;
            } else {
                let vault = scan(dir)?;
                index::save(&vault, &index_file, index_format, *pathstrip, |skipped| {
                    log::warn!("path stripped away entirely, skipping {skipped}");
                })
                .with_context(|| format!("writing {}", index_file.display()))?;
                println!("indexed {} ROM(s) into {}", vault.len(), index_file.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Rename { dat, dir } => {
            let dat = load_dat(dat)?;
            let mut vault = scan(dir)?;
            let outcomes = storage::rename(&dat, &mut vault, cli.force)?;
            render(cli.output, &outcomes, |outcomes| {
                for outcome in outcomes {
                    match &outcome.new_name {
                        Some(new_name) => {
                            println!("{}: {:?} -> {new_name}", outcome.rom, outcome.action)
                        }
                        None => println!("{}: {:?}", outcome.rom, outcome.action),
                    }
                }
            })?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Rebuild {
            dat,
            src,
            dest,
            format,
        } => {
            let dat = load_dat(dat)?;
            let vault = scan(src)?;
            storage::rebuild(dest, &dat, &vault, format, |game| {
                log::info!("rebuilding {game}");
                true
            })
            .with_context(|| format!("rebuilding into {}", dest.display()))?;
            println!("rebuilt {} game(s) into {}", dat.games().len(), dest.display());
            Ok(ExitCode::SUCCESS)
        }

        Command::Repack { files, to, dry_run } => {
            let mut failed = false;
            for file in files {
                match archive::repack(file, to, *dry_run) {
                    Ok(true) => println!("{}: repacked to {to}", file.display()),
                    Ok(false) => {
                        println!("{}: failed, rolled back", file.display());
                        failed = true;
                    }
                    Err(e) => {
                        log::error!("{}: {e}", file.display());
                        failed = true;
                    }
                }
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Header { files, strip } => {
            let mut summaries = Vec::new();
            for file in files {
                let mut sample = vec![0u8; romcellar::checksum::CHUNK_SIZE];
                let n = read_sample(file, &mut sample)
                    .with_context(|| format!("reading {}", file.display()))?;
                let detected = headers::detect(&sample[..n]);
                summaries.push(HeaderSummary {
                    file: file.clone(),
                    system: detected.map(|h| h.system.to_string()),
                    header_size: detected.map(|h| h.size),
                });
                if *strip && detected.is_some() {
                    let rom = romcellar::rom::from_file(
                        Path::new(file.file_name().unwrap_or_default()),
                        file.parent(),
                    )?;
                    let target = file.with_extension("trimmed");
                    rom.copy(&target, RomPart::Rom, cli.force, false)?;
                }
            }
            render(cli.output, &summaries, |summaries| {
                for s in summaries {
                    match (&s.system, s.header_size) {
                        (Some(system), Some(size)) => {
                            println!("{}: {system} header, {size} bytes", s.file.display())
                        }
                        _ => println!("{}: no header", s.file.display()),
                    }
                }
            })?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Clean { dat, dir, trash } => {
            let dat = load_dat(dat)?;
            let mut vault = scan(dir)?;
            let removed = storage::clean(&dat, &mut vault, trash.as_deref(), |_| true)?;
            render(cli.output, &removed, |removed| {
                for rom in removed {
                    println!("removed: {rom}");
                }
                println!("{} ROM(s) removed", removed.len());
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_sample(file: &Path, buf: &mut [u8]) -> anyhow::Result<usize> {
    let mut f = std::fs::File::open(file)?;
    let mut filled = 0;
    loop {
        let n = f.read(&mut buf[filled..])?;
        if n == 0 || filled == buf.len() {
            return Ok(filled);
        }
        filled += n;
    }
}
