//! `c403 disasm`: instruction listing with function entry labels

use crate::output::StyledOutput;
use c403_engine::compiler::bytecode::disassemble;
use std::path::Path;

pub fn execute(path: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let program = super::load(path)?;
    let code_start = program.header().code_start;
    let listing = disassemble(program.code(), code_start);

    for (index, line) in listing.lines().enumerate() {
        let address = code_start + (index * c403_engine::Instruction::SIZE) as u32;
        if address == code_start {
            out.info("<start>:\n");
        }
        if let Some(symbol) = program.function_symbol(address) {
            out.info(&format!(
                "\n<fn@{:#07X}> params={}:\n",
                symbol.address, symbol.parameter_count
            ));
        }
        out.plain(line);
        out.newline();
    }
    out.flush();
    Ok(())
}
