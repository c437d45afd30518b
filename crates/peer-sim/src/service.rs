use crate::config::PeerConfig;
use crate::region;
use amp_ipc::session::{self, run_responder};
use amp_ipc::{
    AckState, CoherentRegion, IpcError, MemDevice, SessionReport, SharedBlock, SharedWindow,
};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a run of the simulated peer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeerStats {
    pub sessions: u64,
    pub completed: u64,
}

pub struct PeerService {
    config: PeerConfig,
    device: MemDevice,
}

impl PeerService {
    pub fn new(config: PeerConfig) -> Result<Self> {
        region::prepare(&config.region_path, config.region_len)?;
        let device = MemDevice::new(&config.region_path);
        Ok(Self { config, device })
    }

    /// Create the block, then answer sessions until `shutdown` is set or
    /// `max_sessions` is reached.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<PeerStats> {
        let window = SharedWindow::<SharedBlock>::map(&self.device, self.config.block_address)
            .with_context(|| {
                format!(
                    "Failed to map shared block from {}",
                    self.config.region_path.display()
                )
            })?;
        let block = session::create(&window, &CoherentRegion)?;

        tracing::info!(
            region = %self.config.region_path.display(),
            address = format_args!("{:#x}", self.config.block_address),
            expected_count = self.config.session.expected_count(),
            "Peer ready, waiting for sessions"
        );

        let mut stats = PeerStats::default();
        while !shutdown.load(Ordering::Relaxed) {
            let outcome = run_responder(block, &self.config.session);
            match &outcome {
                Ok(report) => {
                    stats.completed += 1;
                    tracing::info!(
                        session = stats.sessions,
                        counter = report.final_counter,
                        elapsed = ?report.elapsed,
                        "Session verified"
                    );
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(session = stats.sessions, error = %e, "Session timed out");
                }
                Err(e) => {
                    tracing::error!(session = stats.sessions, error = %e, "Session failed");
                }
            }
            stats.sessions += 1;
            settle(block, &outcome);

            if self.config.max_sessions != 0 && stats.sessions >= self.config.max_sessions {
                break;
            }
            pause(self.config.session_pause, shutdown);
        }

        tracing::info!(
            sessions = stats.sessions,
            completed = stats.completed,
            "Peer stopped"
        );
        Ok(stats)
    }
}

/// Return the block to idle after a session, judged from how the session
/// ended. A session that never left idle must not be reset: the host may
/// have posted a request since.
fn settle(block: &SharedBlock, outcome: &Result<SessionReport, IpcError>) {
    let untouched = matches!(
        outcome,
        Err(IpcError::ProtocolTimeout {
            awaited: AckState::RequestPosted,
            observed: 0,
            ..
        }) | Err(IpcError::UnsafeCounterPolicy)
    );
    if !untouched {
        block.reset_session();
    }
}

/// Sleep for `duration`, waking early when `shutdown` is set.
fn pause(duration: Duration, shutdown: &AtomicBool) {
    let start = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        let elapsed = start.elapsed();
        if elapsed >= duration {
            break;
        }
        thread::sleep(SHUTDOWN_CHECK_INTERVAL.min(duration - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_ipc::session::run_initiator;
    use amp_ipc::{CounterPolicy, HandshakeConfig, Initiator, Responder, Role, SessionConfig};
    use common::Environment;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, max_sessions: u64) -> PeerConfig {
        PeerConfig {
            environment: Environment::Development,
            region_path: dir.path().join("ocm"),
            region_len: 0x1_0000,
            block_address: 0x2000,
            session_pause: Duration::from_millis(1),
            max_sessions,
            session: SessionConfig {
                handshake: HandshakeConfig {
                    poll_interval: Duration::from_micros(50),
                    timeout: Duration::from_secs(10),
                },
                ..SessionConfig::default()
            },
        }
    }

    #[test]
    fn test_peer_serves_consecutive_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, 3);
        let session = config.session;
        let service = PeerService::new(config).unwrap();

        let host = {
            let device = MemDevice::new(dir.path().join("ocm"));
            thread::spawn(move || {
                let window = SharedWindow::<SharedBlock>::map(&device, 0x2000).unwrap();
                let readiness = HandshakeConfig {
                    poll_interval: Duration::from_micros(50),
                    timeout: Duration::from_secs(5),
                };
                let block = session::attach(&window, &CoherentRegion, &readiness).unwrap();
                for _ in 0..3 {
                    Initiator::new(block, session.handshake).await_idle().unwrap();
                    let report = run_initiator(block, &session).unwrap();
                    assert_eq!(report.received_payload, 0xDEAD_BEEF);
                }
            })
        };

        let stats = service.run(&AtomicBool::new(false)).unwrap();
        host.join().expect("Host thread panicked");

        assert_eq!(
            stats,
            PeerStats {
                sessions: 3,
                completed: 3
            }
        );
    }

    #[test]
    fn test_peer_survives_missing_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir, 2);
        config.session.handshake.timeout = Duration::from_millis(10);

        let stats = PeerService::new(config)
            .unwrap()
            .run(&AtomicBool::new(false))
            .unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.completed, 0);
    }

    fn quick_session() -> SessionConfig {
        SessionConfig {
            handshake: HandshakeConfig {
                poll_interval: Duration::from_micros(50),
                timeout: Duration::from_millis(5),
            },
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_request_posted_after_idle_timeout_survives_settle() {
        let block = SharedBlock::new();
        let session = quick_session();

        let outcome = run_responder(&block, &session);
        assert!(matches!(
            outcome,
            Err(IpcError::ProtocolTimeout { observed: 0, .. })
        ));

        // Host posts between the timeout and the peer's bookkeeping.
        Initiator::new(&block, session.handshake)
            .post_request(0xBEEF_DEAD)
            .unwrap();
        settle(&block, &outcome);

        assert_eq!(block.ack(), AckState::RequestPosted as u32);
        let responder = Responder::new(&block, session.handshake);
        assert_eq!(responder.await_request().unwrap(), 0xBEEF_DEAD);
    }

    #[test]
    fn test_settle_resets_after_failed_session() {
        let block = SharedBlock::new();
        let session = quick_session();

        Initiator::new(&block, session.handshake)
            .post_request(0x0BAD_F00D)
            .unwrap();
        let outcome = run_responder(&block, &session);
        assert!(matches!(outcome, Err(IpcError::PayloadMismatch { .. })));

        settle(&block, &outcome);
        assert_eq!(block.ack(), AckState::Idle as u32);
    }

    #[test]
    fn test_settle_resets_after_completed_session() {
        let block = SharedBlock::new();
        block.increment(&CounterPolicy::SingleWriter).unwrap();
        let report = SessionReport {
            role: Role::Responder,
            received_payload: 0xBEEF_DEAD,
            final_counter: 1,
            elapsed: Duration::ZERO,
        };

        settle(&block, &Ok(report));
        assert_eq!(block.counter(), 0);
        assert_eq!(block.ack(), AckState::Idle as u32);
    }

    #[test]
    fn test_shutdown_before_first_session() {
        let dir = tempfile::tempdir().unwrap();
        let service = PeerService::new(config_in(&dir, 0)).unwrap();

        let stats = service.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(stats, PeerStats::default());
    }

    #[test]
    fn test_pause_wakes_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let setter = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shutdown.store(true, Ordering::Relaxed);
            })
        };

        let start = Instant::now();
        pause(Duration::from_secs(30), &shutdown);
        setter.join().expect("Setter thread panicked");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
