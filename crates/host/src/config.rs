use amp_ipc::addresses::{BLOCK_ADDRESS, DEV_MEM_PATH, parse_address};
use amp_ipc::{CounterPolicy, HandshakeConfig, SessionConfig, SpinConfig};
use anyhow::{Result, bail};
use common::{Environment, env_or};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub environment: Environment,
    pub device_path: PathBuf,
    pub block_address: u64,
    /// How long to wait for the peer to publish the magic value.
    pub attach_timeout: Duration,
    pub session: SessionConfig,
}

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_env();

        let device_path = env::var("AMP_MEM_DEVICE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEV_MEM_PATH));

        let block_address = match env::var("AMP_BLOCK_ADDRESS") {
            Ok(text) => match parse_address(&text) {
                Some(address) => address,
                None => bail!("AMP_BLOCK_ADDRESS is not an address: {text:?}"),
            },
            Err(_) => BLOCK_ADDRESS,
        };

        let handshake = HandshakeConfig {
            poll_interval: Duration::from_micros(env_or("AMP_POLL_INTERVAL_US", 100)),
            timeout: Duration::from_millis(env_or("AMP_HANDSHAKE_TIMEOUT_MS", 30_000)),
        };

        let attach_timeout = Duration::from_millis(env_or("AMP_ATTACH_TIMEOUT_MS", 5_000));

        let spin = SpinConfig {
            max_attempts: env_or("AMP_LOCK_ATTEMPTS", 10),
            retry_delay: Duration::from_micros(env_or("AMP_LOCK_DELAY_US", 50)),
        };

        let policy = match env::var("AMP_COUNTER_POLICY")
            .unwrap_or_else(|_| "single".to_string())
            .to_lowercase()
            .as_str()
        {
            "single" | "single-writer" => CounterPolicy::SingleWriter,
            "locked" => CounterPolicy::Locked(spin),
            other => bail!("AMP_COUNTER_POLICY must be 'single' or 'locked', got {other:?}"),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            initiator_increments: env_or("AMP_INCREMENTS", defaults.initiator_increments),
            responder_increments: env_or("AMP_PEER_INCREMENTS", defaults.responder_increments),
            policy,
            lock_retries: env_or("AMP_LOCK_RETRIES", defaults.lock_retries),
            handshake,
            ..defaults
        };

        Ok(Self {
            environment,
            device_path,
            block_address,
            attach_timeout,
            session,
        })
    }

    /// Readiness wait used while attaching: same polling cadence as the
    /// handshake, bounded by `attach_timeout`.
    pub fn readiness(&self) -> HandshakeConfig {
        HandshakeConfig {
            poll_interval: self.session.handshake.poll_interval,
            timeout: self.attach_timeout,
        }
    }
}
