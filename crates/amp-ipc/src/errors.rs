use crate::handshake::AckState;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Cannot open memory device {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to map page {base:#x}: {source}")]
    Mapping {
        base: u64,
        #[source]
        source: io::Error,
    },

    #[error("Shared block at {address:#x} is not mappable: {detail}")]
    Alignment { address: u64, detail: String },

    #[error("Invalid magic {found:#010x} (expected {expected:#010x})")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("Could not acquire lock after {attempts} attempts")]
    LockTimeout { attempts: u32 },

    #[error("Peer did not reach ack {awaited:?} within {waited:?} (last seen {observed})")]
    ProtocolTimeout {
        awaited: AckState,
        observed: u32,
        waited: Duration,
    },

    #[error("Cannot advance ack: expected {expected:?}, found {found}")]
    UnexpectedState { expected: AckState, found: u32 },

    #[error("Ack field holds out-of-range value {0}")]
    InvalidAck(u32),

    #[error("Payload mismatch: expected {expected:#010x}, received {found:#010x}")]
    PayloadMismatch { expected: u32, found: u32 },

    #[error("Counter mismatch: expected {expected}, found {found}")]
    CounterMismatch { expected: u32, found: u32 },

    #[error("Both sides increment the counter but the policy is single-writer")]
    UnsafeCounterPolicy,

    #[error("Platform error: {0}")]
    Platform(String),
}

impl IpcError {
    /// Runtime synchronization failures the caller may retry. Everything
    /// else is a setup or integrity failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IpcError::LockTimeout { .. } | IpcError::ProtocolTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_formatting() {
        let err = IpcError::Access {
            path: PathBuf::from("/dev/mem"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert_eq!(
            err.to_string(),
            "Cannot open memory device /dev/mem: permission denied"
        );

        let err = IpcError::InvalidMagic {
            expected: 0xAA55_AA55,
            found: 0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid magic 0x00000000 (expected 0xaa55aa55)"
        );

        let err = IpcError::PayloadMismatch {
            expected: 0xBEEF_DEAD,
            found: 0xDEAD_BEEF,
        };
        assert_eq!(
            err.to_string(),
            "Payload mismatch: expected 0xbeefdead, received 0xdeadbeef"
        );

        let err = IpcError::UnexpectedState {
            expected: AckState::Idle,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "Cannot advance ack: expected Idle, found 3"
        );

        let err = IpcError::LockTimeout { attempts: 10 };
        assert_eq!(err.to_string(), "Could not acquire lock after 10 attempts");
    }

    #[test]
    fn test_io_sources_are_chained() {
        let err = IpcError::Mapping {
            base: 0xFFFF_2000,
            source: io::Error::from_raw_os_error(libc::ENODEV),
        };
        assert!(err.to_string().starts_with("Failed to map page 0xffff2000"));

        let source = err.source().expect("mapping error should keep its io source");
        let io_err = source
            .downcast_ref::<io::Error>()
            .expect("source should be an io::Error");
        assert_eq!(io_err.raw_os_error(), Some(libc::ENODEV));
    }

    #[test]
    fn test_only_synchronization_failures_are_recoverable() {
        assert!(IpcError::LockTimeout { attempts: 1 }.is_recoverable());
        assert!(
            IpcError::ProtocolTimeout {
                awaited: AckState::ResponsePosted,
                observed: 1,
                waited: Duration::from_millis(5),
            }
            .is_recoverable()
        );

        assert!(!IpcError::InvalidMagic { expected: 1, found: 2 }.is_recoverable());
        assert!(
            !IpcError::Alignment {
                address: 0xFFF,
                detail: "crosses page".to_string()
            }
            .is_recoverable()
        );
        assert!(!IpcError::UnsafeCounterPolicy.is_recoverable());
        assert!(!IpcError::Platform("tlb".to_string()).is_recoverable());
    }
}
