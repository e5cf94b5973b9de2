mod cli;
mod commands;
mod error;
mod logging;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};
use crate::logging::Verbosity;
use clap::Parser;
use exn::ResultExt;
use shelf_config::Config;
use shelf_storage::LocalStorage;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::from(err.exit_code())
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Some(root) = cli.root {
        let cwd = std::env::current_dir().or_raise(|| ErrorKind::Config)?;
        config = Config { root, ..config }.resolve(&cwd);
    }
    let storage = LocalStorage::new(&config.root)
        .or_raise(|| ErrorKind::Storage)?
        .with_concurrency(config.concurrency);
    commands::run(&storage, cli.command).await
}
