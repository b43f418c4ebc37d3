use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use netplay::{Clock, NetplayError, Server, ServerConfig};

/// Netplay session server for emulator clients.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file
    config: PathBuf,
    /// Log level, overrides RUST_LOG
    #[clap(long)]
    log_level: Option<LevelFilter>,
}

fn main() -> Result<(), NetplayError> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::new();
    logger.filter(None, LevelFilter::Info).parse_default_env();
    if let Some(level) = args.log_level {
        logger.filter(None, level);
    }
    logger.init();

    log::info!("starting netplay-server {}", env!("CARGO_PKG_VERSION"));
    let cfg = ServerConfig::from_file(&args.config).map_err(|e| {
        log::error!("error loading configuration file {}: {e}", args.config.display());
        e
    })?;
    cfg.log_summary();

    let mut server = Server::bind(cfg)?;
    let clock = Clock::new();
    loop {
        server.update(clock.now_us());
        std::thread::sleep(server.sleep_duration(clock.now_us()));
    }
}
