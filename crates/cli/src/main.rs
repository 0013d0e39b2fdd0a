use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Command, CoordinatorCommand};
use commands::RunOutcome;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Command::Coordinator(cmd) => match cmd {
            CoordinatorCommand::Create(args) => commands::coordinator::create(args).await,
            CoordinatorCommand::Spawn(args) => commands::coordinator::spawn(args).await,
            CoordinatorCommand::Assign(args) => commands::coordinator::assign(args).await,
            CoordinatorCommand::Watch(args) => commands::coordinator::watch(args).await,
            CoordinatorCommand::Respond(args) => commands::coordinator::respond(args).await,
            CoordinatorCommand::Terminate(args) => commands::coordinator::terminate(args).await,
        },
        Command::Worker(args) => commands::worker::run(args).await,
        Command::Migrate(args) => commands::migrate::run(args),
        Command::Version => {
            println!("silica-coord {}", env!("CARGO_PKG_VERSION"));
            Ok(RunOutcome::Done)
        }
    };

    match result {
        Ok(RunOutcome::Done) => ExitCode::SUCCESS,
        Ok(RunOutcome::Interrupted) => ExitCode::from(130),
        Err(e) => {
            // Stable error-kind line first so scripts can dispatch on it.
            if let Some(err) = e.downcast_ref::<sc_domain::error::Error>() {
                eprintln!("error-kind: {}", err.kind());
            }
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
