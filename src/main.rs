mod cli;
mod engine;
mod error;
mod logging;
mod model;
mod notify;
mod orchestrator;
mod process;
mod profile;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.uses_tui();

    // The local UTC offset can only be read while the process is single-threaded.
    let clock = engine::SystemClock::detect_local();

    let log = logging::init(&logging::LogOptions {
        level: args.log_level.clone(),
        file: args.log_path(),
        stderr: is_non_tui,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(cli::run(args, clock, &log));
    // Notification and output threads must not keep the process alive.
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    drop(log);

    match result {
        Ok(()) => {
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
