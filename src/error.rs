use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the vault core.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed DAT, malformed index content, duplicate game name.
    #[error("content error: {0}")]
    Content(String),

    /// No registered archive provider matches the file.
    #[error("no archiver available for {0}")]
    ArchiverNotFound(PathBuf),

    /// The provider lacks the requested capability.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// A provider call failed structurally (unparseable listing, corrupt
    /// archive, broken pipe to a tool).
    #[error("processing failed: {0}")]
    Processing(String),

    /// An external tool exited non-zero.
    #[error("{cmd} exited with status {status}: {stderr}")]
    Exec {
        cmd: String,
        status: i32,
        stderr: String,
    },

    /// The index file is not valid YAML/JSON or not a mapping.
    #[error("invalid index file: {0}")]
    Load(String),

    /// A destination that must not be overwritten already exists.
    #[error("destination already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }
}
