use crate::errors::IpcError;
use crate::layout::SharedBlock;
use common::{Probe, poll_until};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Progress of one session, as stored in the block's `ack` word.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckState {
    /// Not started.
    Idle = 0,
    /// Initiator wrote its payload.
    RequestPosted = 1,
    /// Responder validated the request and wrote its own payload.
    ResponsePosted = 2,
    /// Initiator validated the response and finished its work.
    Complete = 3,
}

impl AckState {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(AckState::Idle),
            1 => Some(AckState::RequestPosted),
            2 => Some(AckState::ResponsePosted),
            3 => Some(AckState::Complete),
            _ => None,
        }
    }
}

/// Bounds for every wait on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Sleep between two reads of `ack`.
    pub poll_interval: Duration,
    /// Give up waiting after this long.
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Application-level integrity check on a received payload.
pub fn validate_payload(expected: u32, found: u32) -> Result<u32, IpcError> {
    if found == expected {
        Ok(found)
    } else {
        Err(IpcError::PayloadMismatch { expected, found })
    }
}

/// Fail unless `ack` currently holds `state`. Checked before a side writes its
/// payload so that an out-of-turn call leaves the block untouched.
fn expect_state(block: &SharedBlock, state: AckState) -> Result<(), IpcError> {
    match block.ack.load(Ordering::Acquire) {
        found if found == state as u32 => Ok(()),
        found => Err(IpcError::UnexpectedState {
            expected: state,
            found,
        }),
    }
}

/// Move `ack` from `from` to `to`, refusing if the peer is not where this
/// side expects it to be.
fn advance(block: &SharedBlock, from: AckState, to: AckState) -> Result<(), IpcError> {
    match block.ack.compare_exchange(
        from as u32,
        to as u32,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            tracing::debug!(from = ?from, to = ?to, "Ack advanced");
            Ok(())
        }
        Err(found) => Err(IpcError::UnexpectedState {
            expected: from,
            found,
        }),
    }
}

/// Poll until `ack == target`.
///
/// Seeing a state past `target` means the sequence was broken (for example a
/// stale session that was never reset) and is reported as `UnexpectedState`.
fn wait_for(
    block: &SharedBlock,
    target: AckState,
    config: &HandshakeConfig,
) -> Result<(), IpcError> {
    tracing::debug!(awaited = ?target, "Waiting for peer");

    poll_until(
        || {
            let raw = block.ack.load(Ordering::Acquire);
            match AckState::from_u32(raw) {
                None => Err(IpcError::InvalidAck(raw)),
                Some(state) if state == target => Ok(Probe::Ready(())),
                Some(state) if state > target => Err(IpcError::UnexpectedState {
                    expected: target,
                    found: raw,
                }),
                Some(_) => Ok(Probe::Pending(raw)),
            }
        },
        config.poll_interval,
        config.timeout,
        |observed, waited| {
            tracing::warn!(awaited = ?target, observed, ?waited, "Peer did not respond in time");
            IpcError::ProtocolTimeout {
                awaited: target,
                observed,
                waited,
            }
        },
    )
}

/// The side that posts the first payload and drives the counting phase.
#[derive(Debug, Clone, Copy)]
pub struct Initiator<'a> {
    block: &'a SharedBlock,
    config: HandshakeConfig,
}

impl<'a> Initiator<'a> {
    pub fn new(block: &'a SharedBlock, config: HandshakeConfig) -> Self {
        Self { block, config }
    }

    /// Wait until the block is back at `Idle`, e.g. while the creator resets
    /// it after a previous session.
    pub fn await_idle(&self) -> Result<(), IpcError> {
        poll_until(
            || {
                let raw = self.block.ack.load(Ordering::Acquire);
                match AckState::from_u32(raw) {
                    None => Err(IpcError::InvalidAck(raw)),
                    Some(AckState::Idle) => Ok(Probe::Ready(())),
                    Some(_) => Ok(Probe::Pending(raw)),
                }
            },
            self.config.poll_interval,
            self.config.timeout,
            |observed, waited| IpcError::ProtocolTimeout {
                awaited: AckState::Idle,
                observed,
                waited,
            },
        )
    }

    /// Write the request payload, then `ack = 1`.
    pub fn post_request(&self, payload: u32) -> Result<(), IpcError> {
        expect_state(self.block, AckState::Idle)?;
        self.block.payload_a_to_b.store(payload, Ordering::Relaxed);
        advance(self.block, AckState::Idle, AckState::RequestPosted)?;
        tracing::info!(payload = format_args!("{payload:#010x}"), "Request posted");
        Ok(())
    }

    /// Wait for `ack = 2` and return the responder's payload.
    pub fn await_response(&self) -> Result<u32, IpcError> {
        wait_for(self.block, AckState::ResponsePosted, &self.config)?;
        let payload = self.block.payload_b_to_a.load(Ordering::Relaxed);
        tracing::info!(payload = format_args!("{payload:#010x}"), "Response received");
        Ok(payload)
    }

    /// `ack = 3`: the initiator's work is done.
    pub fn complete(&self) -> Result<(), IpcError> {
        advance(self.block, AckState::ResponsePosted, AckState::Complete)
    }
}

/// The side that answers the request and collects the final counter.
#[derive(Debug, Clone, Copy)]
pub struct Responder<'a> {
    block: &'a SharedBlock,
    config: HandshakeConfig,
}

impl<'a> Responder<'a> {
    pub fn new(block: &'a SharedBlock, config: HandshakeConfig) -> Self {
        Self { block, config }
    }

    /// Wait for `ack = 1` and return the initiator's payload.
    pub fn await_request(&self) -> Result<u32, IpcError> {
        wait_for(self.block, AckState::RequestPosted, &self.config)?;
        let payload = self.block.payload_a_to_b.load(Ordering::Relaxed);
        tracing::info!(payload = format_args!("{payload:#010x}"), "Request received");
        Ok(payload)
    }

    /// Write the response payload, then `ack = 2`.
    pub fn post_response(&self, payload: u32) -> Result<(), IpcError> {
        expect_state(self.block, AckState::RequestPosted)?;
        self.block.payload_b_to_a.store(payload, Ordering::Relaxed);
        advance(self.block, AckState::RequestPosted, AckState::ResponsePosted)?;
        tracing::info!(payload = format_args!("{payload:#010x}"), "Response posted");
        Ok(())
    }

    /// Wait for `ack = 3` and return the final counter.
    pub fn await_completion(&self) -> Result<u32, IpcError> {
        wait_for(self.block, AckState::Complete, &self.config)?;
        Ok(self.block.counter())
    }
}
