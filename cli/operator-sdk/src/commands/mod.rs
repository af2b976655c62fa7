//! CLI commands.

mod scorecard;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// operator-sdk - Develop and test Kubernetes operators.
#[derive(Debug, Parser)]
#[command(name = "operator-sdk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run scorecard tests against an operator bundle.
    Scorecard(scorecard::ScorecardCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Scorecard(cmd) => cmd.run().await,
            Commands::Version => {
                println!("operator-sdk {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}
