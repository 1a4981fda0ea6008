//! `c403 run`: execute a program file on the VM

use crate::output::StyledOutput;
use anyhow::Context;
use c403_engine::{Console, Vm, VmOptions};
use std::path::PathBuf;

pub struct RunArgs {
    pub file: PathBuf,
    pub max_call_depth: Option<usize>,
    pub stats: bool,
}

pub fn execute(args: RunArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let program = super::load(&args.file)?;

    let mut options = VmOptions::default();
    if let Some(depth) = args.max_call_depth {
        options.max_call_depth = depth;
    }

    let vm = Vm::with_options(program, Console::stdio(), options);
    let exit = vm
        .run()
        .with_context(|| format!("{} faulted", args.file.display()))?;
    tracing::debug!(?exit, "run finished");

    if args.stats {
        out.dim(&format!(
            "exit value {}, {} instructions\n",
            exit.return_value, exit.instructions
        ));
        out.flush();
    }
    Ok(())
}
