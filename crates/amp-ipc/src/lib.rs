pub mod addresses;
pub mod device;
pub mod errors;
pub mod handshake;
pub mod layout;
pub mod platform;
pub mod session;
pub mod spin_lock;
pub mod window;

pub use device::{DeviceHandle, MemDevice};
pub use errors::IpcError;
pub use handshake::{AckState, HandshakeConfig, Initiator, Responder};
pub use layout::{CounterPolicy, MAGIC, SharedBlock, SharedLayout};
pub use platform::{CoherentRegion, RegionAttributes};
pub use session::{Role, SessionConfig, SessionReport};
pub use spin_lock::{SpinConfig, SpinGuard, SpinLock};
pub use window::{PageGeometry, SharedWindow};
