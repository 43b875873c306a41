//! Error types for relopack

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for bundle operations
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ELF error: {0}")]
    Elf(#[from] ElfError),

    #[error("Not a readable directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("Dependency source missing for {name}: {path:?}")]
    MissingDependency { name: String, path: PathBuf },

    #[error("Unsupported host architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Unsupported interpreter version: {0}")]
    UnsupportedVersion(String),

    #[error("Command exited with status {status}: {command}")]
    CommandFailed { command: String, status: i32 },
}

/// Errors from ELF inspection and patching
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("Failed to open file: {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read file: {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse ELF file: {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: goblin::error::Error,
    },

    #[error("Failed to patch ELF file {path:?}: {message}")]
    Patch { path: PathBuf, message: String },

    #[error("Path contains an interior NUL byte: {0}")]
    InvalidPathString(String),
}
