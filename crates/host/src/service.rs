use crate::config::HostConfig;
use amp_ipc::addresses::{DEV_MEM_PATH, in_shared_range};
use amp_ipc::session::{self, run_initiator};
use amp_ipc::{CoherentRegion, Initiator, MemDevice, SessionReport, SharedBlock, SharedWindow};
use anyhow::{Context, Result};
use std::mem::size_of;
use std::path::Path;

pub struct HostService {
    config: HostConfig,
    device: MemDevice,
}

impl HostService {
    pub fn new(config: HostConfig) -> Self {
        if config.device_path.as_path() == Path::new(DEV_MEM_PATH)
            && !in_shared_range(config.block_address, size_of::<SharedBlock>())
        {
            tracing::warn!(
                address = format_args!("{:#x}", config.block_address),
                "Block address lies outside the reserved on-chip memory range"
            );
        }

        let device = MemDevice::new(&config.device_path);
        Self { config, device }
    }

    /// Attach to the peer's block and run one initiator session.
    pub fn run(&self) -> Result<SessionReport> {
        tracing::info!(
            device = %self.device.path().display(),
            address = format_args!("{:#x}", self.config.block_address),
            "Host service starting"
        );

        let window = SharedWindow::<SharedBlock>::map(&self.device, self.config.block_address)
            .with_context(|| {
                format!(
                    "Failed to map shared block from {} (root is required for /dev/mem)",
                    self.device.path().display()
                )
            })?;

        let block = session::attach(&window, &CoherentRegion, &self.config.readiness())
            .context("Peer has not initialized the shared block")?;

        Initiator::new(block, self.config.session.handshake)
            .await_idle()
            .context("Shared block did not return to idle")?;

        let report = run_initiator(block, &self.config.session).context("Session failed")?;

        tracing::info!(
            received = format_args!("{:#010x}", report.received_payload),
            counter = report.final_counter,
            elapsed = ?report.elapsed,
            "Session complete"
        );
        Ok(report)
    }
}
