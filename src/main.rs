// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Entry point for the `trustboot` binary.

use trustboot::cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = cli::run() {
        log::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
