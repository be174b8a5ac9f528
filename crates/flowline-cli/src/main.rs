//! Flowline command-line entry point.
//!
//! Binary name: `flowline`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the run,
//! validate, or completions handler.

mod builtins;
mod cli;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use flowline_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Shell completions don't need logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowline", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let otel = matches!(cli.command, Commands::Run { otel: true, .. });
    let options = TracingOptions::from_verbosity(cli.verbose, cli.quiet).with_otel(otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Run {
            file,
            config,
            overrides,
            events,
            otel: _,
        } => cli::run::handle_run(&file, &config, &overrides, events, cli.json)
            .await
            .map(|succeeded| {
                if succeeded {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }),
        Commands::Validate { file } => cli::run::handle_validate(&file, cli.json)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    };

    shutdown_tracing();
    result
}
