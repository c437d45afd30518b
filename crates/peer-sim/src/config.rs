use amp_ipc::addresses::{SIMULATED_BLOCK_ADDRESS, SIMULATED_REGION_PATH, parse_address};
use amp_ipc::{CounterPolicy, HandshakeConfig, SessionConfig, SpinConfig};
use anyhow::{Result, bail};
use common::{Environment, env_or};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Size of the simulated on-chip memory: the whole reserved 64 KiB range.
const DEFAULT_REGION_LEN: u64 = 0x1_0000;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub environment: Environment,
    pub region_path: PathBuf,
    pub region_len: u64,
    pub block_address: u64,
    /// Idle time between two sessions.
    pub session_pause: Duration,
    /// Stop after this many sessions. Zero runs until a signal arrives.
    pub max_sessions: u64,
    pub session: SessionConfig,
}

impl PeerConfig {
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_env();

        let region_path = env::var("AMP_MEM_DEVICE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(SIMULATED_REGION_PATH));

        let region_len = env_or("AMP_REGION_LEN", DEFAULT_REGION_LEN);

        let block_address = match env::var("AMP_BLOCK_ADDRESS") {
            Ok(text) => match parse_address(&text) {
                Some(address) => address,
                None => bail!("AMP_BLOCK_ADDRESS is not an address: {text:?}"),
            },
            Err(_) => SIMULATED_BLOCK_ADDRESS,
        };

        let session_pause = Duration::from_millis(env_or("AMP_SESSION_PAUSE_MS", 2_000));
        let max_sessions = env_or("AMP_MAX_SESSIONS", 0);

        let handshake = HandshakeConfig {
            poll_interval: Duration::from_micros(env_or("AMP_POLL_INTERVAL_US", 100)),
            timeout: Duration::from_millis(env_or("AMP_HANDSHAKE_TIMEOUT_MS", 30_000)),
        };

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

        if block_address >= region_len {
            bail!("AMP_BLOCK_ADDRESS {block_address:#x} lies beyond the {region_len:#x}-byte region");
        }

        Ok(Self {
            environment,
            region_path,
            region_len,
            block_address,
            session_pause,
            max_sessions,
            session,
        })
    }
}
