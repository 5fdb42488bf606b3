//! wsbridge binary.
//!
//! Accepts TCP connections and relays each one to its own WebSocket
//! connection. See `wsbridge --help` for options.

use std::process::ExitCode;

use clap::Parser;
use wsbridge_server::{BridgeArgs, cli};

#[tokio::main]
async fn main() -> ExitCode {
    let args = BridgeArgs::parse();

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
