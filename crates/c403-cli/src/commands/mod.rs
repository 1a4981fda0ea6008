//! Subcommand implementations

pub mod disasm;
pub mod header;
pub mod run;

use anyhow::Context;
use c403_engine::LoadedProgram;
use std::path::Path;

/// Open and validate a program file
pub fn load(path: &Path) -> anyhow::Result<LoadedProgram> {
    LoadedProgram::open(path).with_context(|| format!("cannot load {}", path.display()))
}
