//! Binary entry point for the `dock` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dock::cli::Cli;
use dock::commands::{self, CommandError};

const LOG_ENV: &str = "DOCK_LOG";

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut stdout = io::stdout().lock();
    let exit_code = match commands::dispatch(cli, &mut stdout).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };
    stdout.flush().ok();

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn report_error(err: &CommandError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CommandError) {
    writeln!(target, "Error: {err}").ok();
}
