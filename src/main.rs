//! Argus entry point: installs logging, loads configuration, wires up the
//! event-distribution subsystem, and runs until an operator tells it to
//! stop.

use std::env;
use std::io::{stdin, BufRead};
use std::path::PathBuf;

use log::{error, info};

use argus::config::Config;
use argus::Argus;

fn main() {
    env_logger::init();
    info!("=== ARGUS START ===");

    match run() {
        Ok(()) => {
            info!("=== ARGUS STOPPED ===");
        }
        Err(e) => {
            error!("argus: fatal error: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> argus::error::ArgusResult<()> {
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let argus = Argus::start(&config)?;

    if config.server.enabled {
        println!("Argus dashboard feed live at: http://127.0.0.1:{}/events", config.server.port);
    }
    println!("Type 'quit' and press Enter to shut down.");

    for line in stdin().lock().lines() {
        match line {
            Ok(text) if text.trim().eq_ignore_ascii_case("quit") => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    info!("argus: shutdown requested");
    argus.stop();
    Ok(())
}
