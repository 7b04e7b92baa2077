// obsp/src/main.rs
use std::process;

use clap::Parser;
use tracing::{debug, error};

mod cli;
mod logging;

use cli::CliArgs;

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    let guard = logging::init(cli_args.verbose);
    debug!("obsp {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = obsp_core::run().await {
        error!("{:#}", e);
        // process::exit skips destructors; flush the file log first.
        drop(guard);
        process::exit(1);
    }
    debug!("Run completed successfully.");
}
