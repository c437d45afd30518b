use crate::errors::IpcError;

/// Memory-attribute setup for the shared region.
///
/// On a core without hardware coherency with its peer, the region must be
/// made immediately visible (mapped uncached / strongly ordered, or flushed
/// around every `ack` write) before anything in it is trusted. That work is
/// board specific and lives outside this crate; the session calls
/// [`configure`](Self::configure) exactly once per attach or create.
pub trait RegionAttributes {
    fn configure(&self, base: u64, len: usize) -> Result<(), IpcError>;
}

/// Region that needs no extra setup.
///
/// This is the case for the hosted side, where `/dev/mem` opened with
/// `O_SYNC` is already mapped uncached, and for file-backed regions shared
/// between processes of the same host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoherentRegion;

impl RegionAttributes for CoherentRegion {
    fn configure(&self, base: u64, len: usize) -> Result<(), IpcError> {
        tracing::debug!(
            base = format_args!("{base:#x}"),
            len,
            "Region is coherent, no attribute change"
        );
        Ok(())
    }
}
