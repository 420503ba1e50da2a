use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Menu-tree runtime for narrow-channel terminals", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: commands::run::RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a bundle symbol's bytecode as mnemonic lines
    Disasm {
        /// Content bundle directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Node symbol
        sym: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TRELLIS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome: Result<u8> = match cli.command {
        Some(Commands::Disasm { dir, sym }) => commands::disasm::run(&dir, &sym),
        None => commands::run::run(&cli.run),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
