//! operator-sdk - CLI for building and testing Kubernetes operators.
//!
//! Only the `scorecard` command is provided: it runs a bundle's scorecard
//! tests as pods on a cluster and reports the results.

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod error;
mod output;
mod xunit;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = cli.run().await {
        if !error::is_silent(&e) {
            error::print_error(&e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
