use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;

/// Failures while materializing or removing an app's unpacked tree.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The package file does not exist.
    #[error("package '{}' does not exist", path.display())]
    NotFound { path: PathBuf },

    /// The package exists but cannot be opened.
    #[error("couldn't open package '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Creating, touching or removing a directory failed.
    #[error("filesystem error at '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another process holds the unpack lock for this directory.
    #[error("artifact directory '{}' is locked by another process", path.display())]
    Locked { path: PathBuf },

    /// The disassembler could not be started.
    #[error("failed to run disassembler '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The disassembler ran and exited unsuccessfully.
    #[error("{status} unpacking '{}'; output below:\n{output}", package.display())]
    Disassembler {
        package: PathBuf,
        status: ExitStatus,
        output: String,
    },
}

impl ArtifactError {
    pub(crate) fn filesystem(path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unreadable { .. } => "unreadable",
            Self::Filesystem { .. } => "filesystem",
            Self::Locked { .. } => "locked",
            Self::Spawn { .. } => "spawn",
            Self::Disassembler { .. } => "disassembler",
        }
    }
}
