use std::process::ExitCode;

use clap::Parser;
use log::*;

use mesh_viewer::{app, RendererConfig};

fn main() -> ExitCode {
    // Set RUST_LOG (e.g. RUST_LOG=info) to see more than errors.
    pretty_env_logger::init();

    let config = RendererConfig::parse();
    info!("Starting with {:?}", config);

    match app::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}
