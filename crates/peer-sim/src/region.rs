use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Make sure the file backing the simulated on-chip memory exists and is at
/// least `len` bytes long. Existing contents are kept.
///
/// Character devices such as `/dev/mem` are left untouched.
pub fn prepare(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to open region file {}", path.display()))?;

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        tracing::debug!(path = %path.display(), "Region is not a regular file, size unchanged");
        return Ok(());
    }

    if metadata.len() < len {
        file.set_len(len)
            .with_context(|| format!("Failed to size region file {}", path.display()))?;
        tracing::info!(path = %path.display(), len, "Region file sized");
    }
    Ok(())
}
