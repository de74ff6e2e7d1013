// Copyright 2026 Courier Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use courier_runtime::cli;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Courier — relay study-site questions to an AI chat tab over CDP",
    version,
    after_help = "Run 'courier <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the courier daemon in the foreground
    Start {
        /// DevTools endpoint of the browser to attach to
        #[arg(long)]
        devtools: Option<String>,
        /// Start with the automation loop paused
        #[arg(long)]
        paused: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status and session roles
    Status,
    /// Pause the automation loop
    Pause,
    /// Resume the automation loop
    Resume,
    /// Select which oracle answers questions
    Use {
        /// Oracle name: chatgpt, gemini, or deepseek
        oracle: String,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { devtools, paused } => cli::start::run(devtools, paused, cli.verbose).await,
        Commands::Stop => cli::stop::run().await,
        Commands::Status => cli::status::run(cli.json).await,
        Commands::Pause => cli::pause::run().await,
        Commands::Resume => cli::resume::run().await,
        Commands::Use { oracle } => cli::use_cmd::run(&oracle).await,
        Commands::Doctor => cli::doctor::run().await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "courier", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    result
}
