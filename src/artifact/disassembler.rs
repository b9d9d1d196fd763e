use std::path::{Path, PathBuf};
use std::process::Command;

use super::ArtifactError;
use crate::config::DisassemblerConfig;

/// The external decoder invoked to unpack packages.
#[derive(Debug, Clone)]
pub struct Disassembler {
    program: PathBuf,
    args: Vec<String>,
}

impl Disassembler {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &DisassemblerConfig) -> Self {
        Self::new(&config.program, config.args.clone())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `d -s <package> -o <out_dir> -f`: decode, skip sources (keep classes
    /// as smali), write into `out_dir`, overwrite whatever is there.
    ///
    /// On failure the error carries stdout followed by stderr. The two are
    /// captured separately, so lines are not interleaved in emission order.
    pub(crate) fn decode(&self, package: &Path, out_dir: &Path) -> Result<(), ArtifactError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("d")
            .arg("-s")
            .arg(package)
            .arg("-o")
            .arg(out_dir)
            .arg("-f")
            .output()
            .map_err(|source| ArtifactError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ArtifactError::Disassembler {
            package: package.to_path_buf(),
            status: output.status,
            output: format!("{}\n{}", stdout.trim(), stderr.trim()),
        })
    }
}
