//! Preflight checks for the host system.
//!
//! Unpacking needs the disassembler on `PATH` (or at the configured
//! location). Checking up front turns a per-app spawn failure into a single
//! startup error.
//!
//! # Example
//!
//! ```rust
//! use xray_analyzer::preflight::check_disassembler;
//! use xray_analyzer::Disassembler;
//!
//! let apktool = Disassembler::new("apktool", Vec::new());
//! if let Err(e) = check_disassembler(&apktool) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};
use std::path::Path;

use crate::artifact::Disassembler;

/// Whether `cmd` resolves to an executable.
///
/// Absolute or relative paths are checked directly; bare names are looked up
/// in `PATH`.
pub fn command_exists(cmd: impl AsRef<Path>) -> bool {
    which::which(cmd.as_ref()).is_ok()
}

/// Check that the configured disassembler can be executed.
pub fn check_disassembler(disassembler: &Disassembler) -> Result<()> {
    let program = disassembler.program();
    if !command_exists(program) {
        bail!(
            "disassembler '{}' not found (install apktool or set disassembler.program)",
            program.display()
        );
    }
    Ok(())
}
