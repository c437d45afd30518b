mod config;
mod service;

use common::setup_logging;
use config::HostConfig;
use service::HostService;

fn main() -> anyhow::Result<()> {
    let config = HostConfig::from_env()?;
    setup_logging(config.environment);

    tracing::info!("Host starting with config: {:?}", config);

    let service = HostService::new(config);
    match service.run() {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!("Host session failed: {:#}", e);
            Err(e)
        }
    }
}
