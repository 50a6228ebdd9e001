mod cli;
mod execute;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use crate::cli::CLI;
use anyhow::Result;

/// Variable that overrides the log filter given on the command line.
const LOG_ENV: &str = "BULKER_LOG";

fn main() -> Result<()> {
    let cli = CLI::parse();
    init_logging(cli.verbose, cli.silent);
    execute::execute(cli)
}

fn init_logging(verbose: u8, silent: bool) {
    let level = match (silent, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
