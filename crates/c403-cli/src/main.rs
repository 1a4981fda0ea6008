//! C403 command-line tool
//!
//! Runs compiled C403 program files and inspects their contents.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "c403")]
#[command(about = "C403 toolchain: run and inspect program files", long_about = None)]
#[command(version)]
struct Cli {
    /// Colorize output (auto, always, never)
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program file
    Run {
        /// Program file
        #[arg(default_value = "out.cut")]
        file: PathBuf,
        /// Log every executed instruction
        #[arg(long)]
        trace: bool,
        /// Maximum nesting of normal calls
        #[arg(long)]
        max_call_depth: Option<usize>,
        /// Print the exit value and instruction count when the program ends
        #[arg(long)]
        stats: bool,
    },

    /// Print the instruction listing of a program file
    Disasm {
        /// Program file
        file: PathBuf,
    },

    /// Print the header and function symbols of a program file
    Header {
        /// Program file
        file: PathBuf,
    },
}

/// Install the stderr subscriber. `C403_LOG` overrides the default filter.
fn init_logging(trace: bool) {
    let fallback = if trace { "c403=trace" } else { "c403=warn" };
    let filter = EnvFilter::try_from_env("C403_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    let choice = output::resolve_color_choice(cli.color.as_deref());
    let mut out = output::StyledOutput::new(choice);

    let trace = matches!(cli.command, Commands::Run { trace: true, .. });
    init_logging(trace);

    let result = match cli.command {
        Commands::Run {
            file,
            trace: _,
            max_call_depth,
            stats,
        } => commands::run::execute(
            commands::run::RunArgs {
                file,
                max_call_depth,
                stats,
            },
            &mut out,
        ),
        Commands::Disasm { file } => commands::disasm::execute(&file, &mut out),
        Commands::Header { file } => commands::header::execute(&file, &mut out),
    };

    if let Err(e) = result {
        out.stderr_error("Error: ");
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
