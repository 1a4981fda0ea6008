//! `c403 header`: program header and function symbol table

use crate::output::StyledOutput;
use std::path::Path;

pub fn execute(path: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let program = super::load(path)?;

    out.bold(&format!("{}\n", path.display()));
    out.plain(&program.header().to_string());
    out.newline();
    out.plain(&format!("Global words:    {}\n", program.global().len()));
    out.plain(&format!("Instructions:    {}\n", program.code().len()));

    out.newline();
    out.bold("Functions:\n");
    if program.symbols().is_empty() {
        out.dim("  (none)\n");
    }
    for symbol in program.symbols() {
        out.plain(&format!(
            "  {:#07X}  {} parameters\n",
            symbol.address, symbol.parameter_count
        ));
    }
    out.flush();
    Ok(())
}
