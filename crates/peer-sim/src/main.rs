mod config;
mod region;
mod service;

use common::setup_logging;
use config::PeerConfig;
use service::PeerService;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn main() -> anyhow::Result<()> {
    let config = PeerConfig::from_env()?;
    setup_logging(config.environment);
    let shutdown = Arc::new(AtomicBool::new(false));

    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");
    tracing::info!("Peer simulator starting with config: {:?}", config);

    let service = PeerService::new(config)?;
    match service.run(&shutdown) {
        Ok(stats) => {
            tracing::info!(
                sessions = stats.sessions,
                completed = stats.completed,
                "Peer simulator stopped gracefully"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Peer simulator failed: {:#}", e);
            Err(e)
        }
    }
}
