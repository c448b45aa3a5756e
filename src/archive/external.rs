//! Provider backed by an external command-line tool.
//!
//! Every operation is described as data: an executable plus an argument
//! template. Templates substitute `$(infile)`, `$(entry)` and
//! `$(new_entry)`; the `:zip` modifier additionally escapes the glob
//! characters zip-style tools interpret (`\`, `[`, `]`). Commands run
//! with explicit argv arrays, never through a shell; a non-zero exit
//! becomes `Error::Exec` carrying the captured stderr.

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use regex::Regex;

use crate::error::{Error, Result};

use super::{emulate_delete, emulate_rename, ArchiveFormat};

/// One tool invocation: executable and argument template.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub cmd: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(cmd: &str, args: &[&str]) -> Self {
        ToolCommand {
            cmd: cmd.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// The list operation: an invocation plus a row parser. The parser is a
/// regex with a named capture `entry` (and optionally `type`); the
/// validator maps capture names to anchored patterns a row must satisfy
/// to count, which is how directory rows get rejected.
#[derive(Debug, Clone)]
pub struct ListCommand {
    pub cmd: String,
    pub args: Vec<String>,
    pub parser: String,
    pub validator: Vec<(String, String)>,
}

pub struct ExternalFormat {
    name: String,
    extensions: Vec<String>,
    mimetypes: Vec<String>,
    list: ListCommand,
    read: ToolCommand,
    write: Option<ToolCommand>,
    delete: Option<ToolCommand>,
    rename: Option<ToolCommand>,
}

impl ExternalFormat {
    /// Build a provider from a declarative table. `list` and `read` are
    /// mandatory; a provider without them is unusable and `None` is
    /// returned so the caller skips registration. A provider without
    /// `write` is registered read-only.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        extensions: &[&str],
        mimetypes: &[&str],
        list: Option<ListCommand>,
        read: Option<ToolCommand>,
        write: Option<ToolCommand>,
        delete: Option<ToolCommand>,
        rename: Option<ToolCommand>,
    ) -> Option<Self> {
        Some(ExternalFormat {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            mimetypes: mimetypes.iter().map(|m| m.to_string()).collect(),
            list: list?,
            read: read?,
            write,
            delete,
            rename,
        })
    }

    /// The stock 7z tool description.
    pub fn seven_zip() -> Self {
        ExternalFormat {
            name: "7z".to_string(),
            extensions: vec!["7z".to_string()],
            mimetypes: vec!["application/x-7z-compressed".to_string()],
            list: ListCommand {
                cmd: "7z".to_string(),
                args: vec!["l".to_string(), "-ba".to_string(), "$(infile)".to_string()],
                // date time attr size [compressed] name
                parser: r"^\S+\s+\S+\s+(?P<type>[A-Z.]{5})\s+(?P<size>\d+)(?:\s+(?P<packed>\d+))?\s+(?P<entry>.+)$"
                    .to_string(),
                validator: vec![("type".to_string(), r"[^D].*".to_string())],
            },
            read: ToolCommand::new("7z", &["x", "-so", "$(infile)", "$(entry:zip)"]),
            write: Some(ToolCommand::new("7z", &["a", "-si$(entry)", "$(infile)"])),
            delete: Some(ToolCommand::new("7z", &["d", "$(infile)", "$(entry:zip)"])),
            rename: Some(ToolCommand::new(
                "7z",
                &["rn", "$(infile)", "$(entry:zip)", "$(new_entry)"],
            )),
        }
    }
}

/// Escape the glob characters zip-style tools special-case.
pub fn escape_zip(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    for c in entry.chars() {
        if matches!(c, '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Substitute template tokens into an argument list.
pub fn expand_args(
    args: &[String],
    infile: &Path,
    entry: Option<&str>,
    new_entry: Option<&str>,
) -> Vec<String> {
    let infile = infile.to_string_lossy();
    args.iter()
        .map(|arg| {
            let mut s = arg.replace("$(infile)", &infile);
            if let Some(e) = entry {
                s = s.replace("$(entry:zip)", &escape_zip(e));
                s = s.replace("$(entry)", e);
            }
            if let Some(e) = new_entry {
                s = s.replace("$(new_entry:zip)", &escape_zip(e));
                s = s.replace("$(new_entry)", e);
            }
            s
        })
        .collect()
}

fn check_status(cmd: &str, output: Output) -> Result<Output> {
    if !output.status.success() {
        return Err(Error::Exec {
            cmd: cmd.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

fn run(cmd: &str, args: &[String]) -> Result<Output> {
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::processing(format!("spawning {cmd}: {e}")))?;
    check_status(cmd, output)
}

fn run_with_stdin(cmd: &str, args: &[String], data: &mut dyn Read) -> Result<Output> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::processing(format!("spawning {cmd}: {e}")))?;
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::processing(format!("{cmd}: no stdin pipe")))?;
        io::copy(data, &mut stdin)?;
    }
    let output = child.wait_with_output()?;
    check_status(cmd, output)
}

impl ArchiveFormat for ExternalFormat {
    fn name(&self) -> &str {
        &self.name
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn mimetypes(&self) -> Vec<String> {
        self.mimetypes.clone()
    }

    fn writable(&self) -> bool {
        self.write.is_some()
    }

    fn list(&self, file: &Path) -> Result<Vec<String>> {
        let args = expand_args(&self.list.args, file, None, None);
        let output = run(&self.list.cmd, &args)?;
        let text = String::from_utf8_lossy(&output.stdout);

        let parser = Regex::new(&self.list.parser)
            .map_err(|e| Error::processing(format!("bad list parser: {e}")))?;
        let mut validators = Vec::new();
        for (capture, required) in &self.list.validator {
            let re = Regex::new(&format!("^(?:{required})$"))
                .map_err(|e| Error::processing(format!("bad list validator: {e}")))?;
            validators.push((capture.as_str(), re));
        }

        let mut entries = Vec::new();
        for line in text.lines() {
            let Some(caps) = parser.captures(line) else {
                continue;
            };
            let valid = validators.iter().all(|(capture, re)| {
                caps.name(capture)
                    .is_some_and(|m| re.is_match(m.as_str()))
            });
            if !valid {
                continue;
            }
            if let Some(entry) = caps.name("entry") {
                let entry = entry.as_str().to_string();
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    fn each(
        &self,
        file: &Path,
        f: &mut dyn FnMut(&str, &mut dyn Read) -> Result<bool>,
    ) -> Result<()> {
        for entry in self.list(file)? {
            let mut reader = self.reader(file, &entry)?;
            if !f(&entry, &mut reader)? {
                break;
            }
        }
        Ok(())
    }

    fn reader(&self, file: &Path, entry: &str) -> Result<Box<dyn Read>> {
        let args = expand_args(&self.read.args, file, Some(entry), None);
        let output = run(&self.read.cmd, &args)?;
        Ok(Box::new(Cursor::new(output.stdout)))
    }

    fn write(&self, file: &Path, entry: &str, data: &mut dyn Read) -> Result<()> {
        let Some(write) = &self.write else {
            return Err(Error::NotSupported("write"));
        };
        let args = expand_args(&write.args, file, Some(entry), None);
        run_with_stdin(&write.cmd, &args, data)?;
        Ok(())
    }

    fn delete(&self, file: &Path, entry: &str) -> Result<()> {
        match &self.delete {
            Some(delete) => {
                let args = expand_args(&delete.args, file, Some(entry), None);
                run(&delete.cmd, &args)?;
                Ok(())
            }
            None => emulate_delete(self, file, entry),
        }
    }

    fn rename_entry(&self, file: &Path, from: &str, to: &str) -> Result<()> {
        match &self.rename {
            Some(rename) => {
                let args = expand_args(&rename.args, file, Some(from), Some(to));
                run(&rename.cmd, &args)?;
                Ok(())
            }
            None => emulate_rename(self, file, from, to),
        }
    }
}
