use crate::addresses::DEV_MEM_PATH;
use crate::errors::IpcError;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Raw physical memory device shared by every mapping in the process.
///
/// Construct one per device and hand a reference to each
/// [`SharedWindow`](crate::SharedWindow). The device file is opened on the
/// first [`acquire`](Self::acquire) while no handle is alive, and closed when
/// the last [`DeviceHandle`] is dropped. A later acquire opens it again.
#[derive(Debug)]
pub struct MemDevice {
    path: PathBuf,
    open: Mutex<Weak<DeviceFile>>,
}

#[derive(Debug)]
struct DeviceFile {
    file: File,
    path: PathBuf,
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "Memory device closed");
    }
}

/// A live hold on an open [`MemDevice`]. Dropping it releases the hold.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceFile>,
}

impl MemDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            open: Mutex::new(Weak::new()),
        }
    }

    /// The `/dev/mem` device. Opening it needs elevated privilege.
    pub fn dev_mem() -> Self {
        Self::new(DEV_MEM_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Obtain a handle, opening the device if nobody else holds it.
    ///
    /// The device is opened read/write with `O_SYNC`, which makes `/dev/mem`
    /// mappings uncached.
    pub fn acquire(&self) -> Result<DeviceHandle, IpcError> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(inner) = open.upgrade() {
            return Ok(DeviceHandle { inner });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(|source| IpcError::Access {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = %self.path.display(), "Memory device opened");

        let inner = Arc::new(DeviceFile {
            file,
            path: self.path.clone(),
        });
        *open = Arc::downgrade(&inner);
        Ok(DeviceHandle { inner })
    }

    /// Number of live handles. Zero means the device is closed.
    pub fn holders(&self) -> usize {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
    }
}

impl DeviceHandle {
    pub fn file(&self) -> &File {
        &self.inner.file
    }

    /// Give the hold back. Equivalent to dropping the handle.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::NamedTempFile;

    #[test]
    fn test_first_acquire_opens_and_last_release_closes() {
        let temp_file = NamedTempFile::new().unwrap();
        let device = MemDevice::new(temp_file.path());

        assert_eq!(device.holders(), 0, "Nothing opened before acquire");

        let first = device.acquire().unwrap();
        assert_eq!(device.holders(), 1);

        let second = device.acquire().unwrap();
        assert_eq!(device.holders(), 2);

        drop(first);
        assert_eq!(device.holders(), 1, "Device stays open for second holder");

        second.release();
        assert_eq!(device.holders(), 0, "Last release closes the device");
    }

    #[test]
    fn test_path_is_kept() {
        assert_eq!(MemDevice::dev_mem().path(), Path::new("/dev/mem"));
        assert_eq!(MemDevice::new("/tmp/ocm").path(), Path::new("/tmp/ocm"));
    }

    #[test]
    fn test_holders_share_one_descriptor() {
        use std::os::fd::AsRawFd;

        let temp_file = NamedTempFile::new().unwrap();
        let device = MemDevice::new(temp_file.path());

        let a = device.acquire().unwrap();
        let b = device.acquire().unwrap();
        assert_eq!(a.file().as_raw_fd(), b.file().as_raw_fd());
    }

    #[test]
    fn test_reacquire_after_close_reopens() {
        let temp_file = NamedTempFile::new().unwrap();
        let device = MemDevice::new(temp_file.path());

        device.acquire().unwrap().release();
        assert_eq!(device.holders(), 0);

        let handle = device.acquire().unwrap();
        assert_eq!(device.holders(), 1);
        drop(handle);
    }

    #[test]
    fn test_missing_device_is_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = MemDevice::new(dir.path().join("no-such-device"));

        match device.acquire() {
            Err(IpcError::Access { path, source }) => {
                assert_eq!(path, dir.path().join("no-such-device"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected Access error, got {:?}", other),
        }
        assert_eq!(device.holders(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let temp_file = NamedTempFile::new().unwrap();
        let device = Arc::new(MemDevice::new(temp_file.path()));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let device = Arc::clone(&device);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let handle = device.acquire().unwrap();
                        assert!(device.holders() >= 1);
                        drop(handle);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("Worker thread panicked");
        }
        assert_eq!(device.holders(), 0);
    }
}
