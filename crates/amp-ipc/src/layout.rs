use crate::errors::IpcError;
use crate::spin_lock::{SpinConfig, SpinLock};
use std::mem::{align_of, offset_of, size_of};
use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel the creator publishes once the block is initialized.
pub const MAGIC: u32 = 0xAA55_AA55;

/// Types that may be overlaid on memory shared with another program.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain only atomics (or types for
/// which any bit pattern is valid and that are only accessed atomically),
/// hold no pointers, and have a layout that is identical in both images.
pub unsafe trait SharedLayout: Sync + Sized {}

/// Control block exchanged between the two cores.
///
/// ```text
/// offset  field            writer
///  0      magic            creator, last step of initialization
///  4      ack              both, see `AckState`
///  8      payload_a_to_b   initiator
/// 12      payload_b_to_a   responder
/// 16      counter          counting side(s), see `CounterPolicy`
/// 20      lock             lock holder (0 clear, 1 set)
/// ```
///
/// Ordering per field:
/// - `magic`: release store by the creator, acquire load before trusting
///   anything else.
/// - `ack`: release on every transition, acquire when polling. This is what
///   publishes the payload fields.
/// - payloads: relaxed; only read after observing the matching `ack`.
/// - `counter`: acquire/release, guarded by `lock` when two sides write.
/// - `lock`: acquire on test-and-set, release on clear.
#[repr(C, align(4))]
#[derive(Debug)]
pub struct SharedBlock {
    pub(crate) magic: AtomicU32,
    pub(crate) ack: AtomicU32,
    pub(crate) payload_a_to_b: AtomicU32,
    pub(crate) payload_b_to_a: AtomicU32,
    pub(crate) counter: AtomicU32,
    pub(crate) lock: AtomicU32,
}

const _: () = {
    assert!(size_of::<SharedBlock>() == 24);
    assert!(align_of::<SharedBlock>() == 4);
    assert!(offset_of!(SharedBlock, magic) == 0);
    assert!(offset_of!(SharedBlock, ack) == 4);
    assert!(offset_of!(SharedBlock, payload_a_to_b) == 8);
    assert!(offset_of!(SharedBlock, payload_b_to_a) == 12);
    assert!(offset_of!(SharedBlock, counter) == 16);
    assert!(offset_of!(SharedBlock, lock) == 20);
};

// SAFETY: repr(C), six AtomicU32 fields, layout asserted above.
unsafe impl SharedLayout for SharedBlock {}

/// How writers of `counter` are kept from losing updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterPolicy {
    /// Plain read then write, no lock. Correct only while exactly one side
    /// increments and the region is immediately visible to the other.
    #[default]
    SingleWriter,
    /// Every increment happens under the block's spin lock. Required as soon
    /// as both sides increment.
    Locked(SpinConfig),
}

impl SharedBlock {
    /// An initialized block, for hosting the protocol in ordinary memory.
    pub const fn new() -> Self {
        Self {
            magic: AtomicU32::new(MAGIC),
            ack: AtomicU32::new(0),
            payload_a_to_b: AtomicU32::new(0),
            payload_b_to_a: AtomicU32::new(0),
            counter: AtomicU32::new(0),
            lock: AtomicU32::new(0),
        }
    }

    /// Creator only: clear every field, then publish `magic`.
    pub fn initialize(&self) {
        self.magic.store(0, Ordering::Relaxed);
        self.clear_fields();
        self.magic.store(MAGIC, Ordering::Release);
    }

    /// Creator only: return to `ack == 0` with a zero counter so a new
    /// session can start. `ack` is written last.
    pub fn reset_session(&self) {
        self.clear_fields();
    }

    fn clear_fields(&self) {
        self.payload_a_to_b.store(0, Ordering::Relaxed);
        self.payload_b_to_a.store(0, Ordering::Relaxed);
        self.counter.store(0, Ordering::Relaxed);
        self.lock.store(0, Ordering::Relaxed);
        self.ack.store(0, Ordering::Release);
    }

    /// Fails with `InvalidMagic` unless the creator has initialized the block.
    pub fn verify(&self) -> Result<(), IpcError> {
        match self.magic() {
            MAGIC => Ok(()),
            found => Err(IpcError::InvalidMagic {
                expected: MAGIC,
                found,
            }),
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    /// Raw handshake progress value.
    pub fn ack(&self) -> u32 {
        self.ack.load(Ordering::Acquire)
    }

    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Lock over the block's `lock` word.
    pub fn counter_lock(&self, config: SpinConfig) -> SpinLock<'_> {
        SpinLock::new(&self.lock, config)
    }

    /// Add one to `counter` and return the new value.
    ///
    /// Under [`CounterPolicy::SingleWriter`] this is deliberately a load
    /// followed by a store rather than a read-modify-write instruction: the
    /// peer may map the region as strongly-ordered memory, where exclusive
    /// access instructions are not available.
    pub fn increment(&self, policy: &CounterPolicy) -> Result<u32, IpcError> {
        match policy {
            CounterPolicy::SingleWriter => Ok(self.bump()),
            CounterPolicy::Locked(config) => {
                let _guard = self.counter_lock(*config).acquire()?;
                Ok(self.bump())
            }
        }
    }

    fn bump(&self) -> u32 {
        let next = self.counter.load(Ordering::Acquire).wrapping_add(1);
        self.counter.store(next, Ordering::Release);
        next
    }
}

impl Default for SharedBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_block_is_valid_and_idle() {
        let block = SharedBlock::new();
        assert!(block.verify().is_ok());
        assert_eq!(block.ack(), 0);
        assert_eq!(block.counter(), 0);
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let block = SharedBlock::new();
        block.magic.store(0xDEAD_0000, Ordering::Release);

        match block.verify() {
            Err(IpcError::InvalidMagic { expected, found }) => {
                assert_eq!(expected, MAGIC);
                assert_eq!(found, 0xDEAD_0000);
            }
            other => panic!("Expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_initialize_clears_stale_state() {
        let block = SharedBlock::new();
        block.magic.store(0x1234, Ordering::Relaxed);
        block.ack.store(3, Ordering::Relaxed);
        block.payload_a_to_b.store(5, Ordering::Relaxed);
        block.counter.store(999, Ordering::Relaxed);
        block.lock.store(1, Ordering::Relaxed);

        block.initialize();

        assert!(block.verify().is_ok());
        assert_eq!(block.ack(), 0);
        assert_eq!(block.payload_a_to_b.load(Ordering::Relaxed), 0);
        assert_eq!(block.counter(), 0);
        assert!(!block.counter_lock(SpinConfig::default()).is_locked());
    }

    #[test]
    fn test_reset_session_keeps_magic() {
        let block = SharedBlock::new();
        block.ack.store(3, Ordering::Relaxed);
        block.counter.store(1000, Ordering::Relaxed);

        block.reset_session();

        assert_eq!(block.magic(), MAGIC);
        assert_eq!(block.ack(), 0);
        assert_eq!(block.counter(), 0);
    }

    #[test]
    fn test_single_writer_counts_exactly() {
        let block = SharedBlock::new();
        for expected in 1..=250 {
            assert_eq!(
                block.increment(&CounterPolicy::SingleWriter).unwrap(),
                expected
            );
        }
        assert_eq!(block.counter(), 250);
    }

    #[test]
    fn test_locked_increment_fails_while_lock_is_held() {
        let block = SharedBlock::new();
        let config = SpinConfig {
            max_attempts: 2,
            retry_delay: Duration::from_micros(10),
        };

        let guard = block.counter_lock(config).acquire().unwrap();
        assert!(matches!(
            block.increment(&CounterPolicy::Locked(config)),
            Err(IpcError::LockTimeout { attempts: 2 })
        ));
        assert_eq!(block.counter(), 0, "Timed-out increment must not write");

        drop(guard);
        assert_eq!(block.increment(&CounterPolicy::Locked(config)).unwrap(), 1);
    }

    #[test]
    fn test_locked_policy_has_no_lost_updates() {
        let block = Arc::new(SharedBlock::new());
        let policy = CounterPolicy::Locked(SpinConfig {
            max_attempts: u32::MAX,
            retry_delay: Duration::from_micros(1),
        });

        let workers: Vec<_> = [700u32, 300]
            .into_iter()
            .map(|n| {
                let block = block.clone();
                thread::spawn(move || {
                    for _ in 0..n {
                        block.increment(&policy).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("Worker thread panicked");
        }
        assert_eq!(block.counter(), 1000);
    }
}
