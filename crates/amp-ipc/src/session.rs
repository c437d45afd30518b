//! One complete exchange between the two cores
//!
//! 1. initiator posts `request_payload`, responder checks it;
//! 2. responder posts `response_payload`, initiator checks it;
//! 3. both sides run their share of increments (the responder's share is
//!    usually zero);
//! 4. initiator marks the session complete, responder checks that the
//!    counter holds exactly the agreed number of increments.

use crate::errors::IpcError;
use crate::handshake::{HandshakeConfig, Initiator, Responder, validate_payload};
use crate::layout::{CounterPolicy, MAGIC, SharedBlock};
use crate::platform::RegionAttributes;
use crate::window::SharedWindow;
use common::{Probe, poll_until, retry_with_backoff};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Written by the initiator, checked by the responder.
    pub request_payload: u32,
    /// Written by the responder, checked by the initiator.
    pub response_payload: u32,
    pub initiator_increments: u32,
    pub responder_increments: u32,
    pub policy: CounterPolicy,
    /// How many times a timed-out locked increment is retried before the
    /// session fails.
    pub lock_retries: u32,
    /// First backoff between two lock retries, doubled each time.
    pub lock_backoff: Duration,
    pub handshake: HandshakeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_payload: 0xBEEF_DEAD,
            response_payload: 0xDEAD_BEEF,
            initiator_increments: 1_000,
            responder_increments: 0,
            policy: CounterPolicy::SingleWriter,
            lock_retries: 3,
            lock_backoff: Duration::from_micros(100),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Counter value the responder expects at the end of the session.
    pub fn expected_count(&self) -> u32 {
        self.initiator_increments
            .wrapping_add(self.responder_increments)
    }

    /// Two writers without the lock would lose updates.
    fn check_policy(&self) -> Result<(), IpcError> {
        let both_write = self.initiator_increments > 0 && self.responder_increments > 0;
        if both_write && self.policy == CounterPolicy::SingleWriter {
            return Err(IpcError::UnsafeCounterPolicy);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub role: Role,
    /// The peer's payload, already validated.
    pub received_payload: u32,
    /// Counter as seen by this side at the end of its part.
    pub final_counter: u32,
    pub elapsed: Duration,
}

/// Creator side: configure the region, initialize the block and publish the
/// magic value.
pub fn create<'w>(
    window: &'w SharedWindow<SharedBlock>,
    attributes: &dyn RegionAttributes,
) -> Result<&'w SharedBlock, IpcError> {
    attributes.configure(window.page_base(), window.page_len())?;

    let block = window.block();
    block.initialize();
    tracing::info!(
        address = format_args!("{:#x}", window.physical_address()),
        "Shared block initialized"
    );
    Ok(block)
}

/// Attaching side: configure the region, then wait (bounded by
/// `readiness.timeout`) for the creator's magic value.
///
/// A block that still carries the wrong magic when the wait ends is rejected
/// with `InvalidMagic`.
pub fn attach<'w>(
    window: &'w SharedWindow<SharedBlock>,
    attributes: &dyn RegionAttributes,
    readiness: &HandshakeConfig,
) -> Result<&'w SharedBlock, IpcError> {
    attributes.configure(window.page_base(), window.page_len())?;

    let block = window.block();
    poll_until(
        || match block.magic() {
            MAGIC => Ok(Probe::Ready(())),
            found => Ok(Probe::Pending(found)),
        },
        readiness.poll_interval,
        readiness.timeout,
        |found, _| IpcError::InvalidMagic {
            expected: MAGIC,
            found,
        },
    )?;

    tracing::info!(
        address = format_args!("{:#x}", window.physical_address()),
        "Attached to shared block"
    );
    Ok(block)
}

fn count(block: &SharedBlock, increments: u32, config: &SessionConfig) -> Result<(), IpcError> {
    for _ in 0..increments {
        retry_with_backoff(
            || block.increment(&config.policy),
            config.lock_retries.saturating_add(1),
            config.lock_backoff,
            "Counter increment",
        )?;
    }
    Ok(())
}

/// Run the initiator's half of a session on an attached block.
pub fn run_initiator(
    block: &SharedBlock,
    config: &SessionConfig,
) -> Result<SessionReport, IpcError> {
    config.check_policy()?;
    let start = Instant::now();
    let initiator = Initiator::new(block, config.handshake);

    initiator.post_request(config.request_payload)?;
    let received = validate_payload(config.response_payload, initiator.await_response()?)?;

    tracing::info!(
        increments = config.initiator_increments,
        policy = ?config.policy,
        "Counting"
    );
    count(block, config.initiator_increments, config)?;
    initiator.complete()?;

    let report = SessionReport {
        role: Role::Initiator,
        received_payload: received,
        final_counter: block.counter(),
        elapsed: start.elapsed(),
    };
    tracing::info!(counter = report.final_counter, elapsed = ?report.elapsed, "Initiator done");
    Ok(report)
}

/// Run the responder's half of a session on a created block.
pub fn run_responder(
    block: &SharedBlock,
    config: &SessionConfig,
) -> Result<SessionReport, IpcError> {
    config.check_policy()?;
    let start = Instant::now();
    let responder = Responder::new(block, config.handshake);

    let received = validate_payload(config.request_payload, responder.await_request()?)?;
    responder.post_response(config.response_payload)?;

    count(block, config.responder_increments, config)?;

    let final_counter = responder.await_completion()?;
    let expected = config.expected_count();
    if final_counter != expected {
        return Err(IpcError::CounterMismatch {
            expected,
            found: final_counter,
        });
    }

    let report = SessionReport {
        role: Role::Responder,
        received_payload: received,
        final_counter,
        elapsed: start.elapsed(),
    };
    tracing::info!(counter = final_counter, elapsed = ?report.elapsed, "Responder done");
    Ok(report)
}
