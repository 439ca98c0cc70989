//! warden: firewall stack orchestration for Docker fleets.
//!
//! Entry point: parse CLI, set up tracing, dispatch to command
//! handlers, persist state, map errors to exit codes.

mod cli;
mod commands;
mod error;
mod output;
mod session;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::session::Session;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Map -v count to a tracing filter; RUST_LOG wins when set.
fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // No fleet session needed for these.
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "warden", &mut std::io::stdout());
            Ok(())
        }
        Command::Countries => commands::countries::handle(&cli.global),

        cmd => {
            let session = Session::open(&cli.global)?;
            let outcome = commands::dispatch(cmd, &session, &cli.global).await;

            // Installers mint keys and flip flags even on runs that end
            // in an error; that progress must reach the state file. A
            // persist failure only surfaces when dispatch itself
            // succeeded, so it never masks the more useful error.
            match (outcome, session.persist()) {
                (Ok(()), persisted) => persisted,
                (outcome @ Err(_), Ok(())) => outcome,
                (Err(err), Err(persist_err)) => {
                    tracing::warn!(error = %persist_err, "state not persisted");
                    Err(err)
                }
            }
        }
    }
}
