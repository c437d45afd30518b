//! Physical placement of the shared region
//!
//! The board reserves the high on-chip memory range for inter-core traffic.
//! Both images must agree on every constant here.

/// First byte of the range reserved for inter-core communication.
pub const SHARED_MEM_START_ADDRESS: u64 = 0xFFFF_0000;

/// Last byte of the reserved range.
pub const SHARED_MEM_LAST_ADDRESS: u64 = 0xFFFF_FFFF;

/// Physical address of the [`SharedBlock`](crate::SharedBlock).
pub const BLOCK_ADDRESS: u64 = SHARED_MEM_START_ADDRESS + 0x2000;

/// Raw physical memory device used by the hosted side.
pub const DEV_MEM_PATH: &str = "/dev/mem";

/// File standing in for the reserved range when the creator is simulated on
/// a hosted system. Addresses are then offsets into this file.
pub const SIMULATED_REGION_PATH: &str = "/dev/shm/amp_ocm";

/// Offset of the block inside [`SIMULATED_REGION_PATH`].
pub const SIMULATED_BLOCK_ADDRESS: u64 = BLOCK_ADDRESS - SHARED_MEM_START_ADDRESS;

/// Parse an address written as `0x`-prefixed hex or plain decimal.
/// Underscores are accepted as digit separators.
pub fn parse_address(text: &str) -> Option<u64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => cleaned.parse().ok(),
    }
}

/// Whether `len` bytes starting at `address` lie inside the reserved range.
pub fn in_shared_range(address: u64, len: usize) -> bool {
    address >= SHARED_MEM_START_ADDRESS
        && address
            .checked_add(len as u64)
            .is_some_and(|end| end - 1 <= SHARED_MEM_LAST_ADDRESS)
}
