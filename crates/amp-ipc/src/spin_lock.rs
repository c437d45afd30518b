use crate::errors::IpcError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Liveness parameters of a [`SpinLock`].
///
/// The defaults match what the bare-metal image is built with:
/// 10 attempts, 50µs apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
    /// Test-and-set attempts before giving up. Zero fails immediately.
    pub max_attempts: u32,
    /// Sleep between two failed attempts.
    pub retry_delay: Duration,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_micros(50),
        }
    }
}

impl SpinConfig {
    /// Longest time `acquire` can spend before reporting a timeout.
    pub fn budget(&self) -> Duration {
        self.retry_delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}

/// Bounded-retry lock over a flag word that may live in shared memory.
///
/// The flag is a plain `u32` (0 clear, 1 set) so it has the same width and
/// alignment on both cores. The lock does not own the flag; any number of
/// `SpinLock`s, in either image, may be built over the same word.
#[derive(Debug, Clone, Copy)]
pub struct SpinLock<'a> {
    flag: &'a AtomicU32,
    config: SpinConfig,
}

/// Proof of holding a [`SpinLock`]. The flag is cleared on drop, including
/// during unwinding.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SpinGuard<'a> {
    flag: &'a AtomicU32,
}

impl<'a> SpinLock<'a> {
    pub fn new(flag: &'a AtomicU32, config: SpinConfig) -> Self {
        Self { flag, config }
    }

    /// Single test-and-set with acquire ordering.
    pub fn try_acquire(&self) -> Option<SpinGuard<'a>> {
        if self.flag.swap(LOCKED, Ordering::Acquire) == UNLOCKED {
            Some(SpinGuard { flag: self.flag })
        } else {
            None
        }
    }

    /// Retry [`try_acquire`](Self::try_acquire) up to `max_attempts` times,
    /// sleeping `retry_delay` between attempts.
    pub fn acquire(&self) -> Result<SpinGuard<'a>, IpcError> {
        let attempts = self.config.max_attempts;
        for attempt in 0..attempts {
            if let Some(guard) = self.try_acquire() {
                if attempt > 0 {
                    tracing::trace!(attempt, "Spin lock acquired after contention");
                }
                return Ok(guard);
            }
            if attempt + 1 < attempts {
                std::thread::sleep(self.config.retry_delay);
            }
        }

        tracing::warn!(
            attempts,
            budget = ?self.config.budget(),
            "Spin lock retry budget exhausted"
        );
        Err(IpcError::LockTimeout { attempts })
    }

    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Acquire) != UNLOCKED
    }
}

impl SpinGuard<'_> {
    /// Release now rather than at end of scope.
    pub fn release(self) {}
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(UNLOCKED, Ordering::Release);
    }
}
