use crate::device::{DeviceHandle, MemDevice};
use crate::errors::IpcError;
use crate::layout::SharedLayout;
use memmap2::{MmapMut, MmapOptions};
use std::fmt::Write as _;
use std::mem::{align_of, size_of};
use std::ops::Deref;
use std::ptr::NonNull;

/// Page size and the masks derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    size: usize,
}

impl PageGeometry {
    /// Page size reported by the running system.
    pub fn system() -> Self {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size)
            .ok()
            .and_then(Self::with_size)
            .unwrap_or(Self { size: 4096 })
    }

    /// `None` unless `size` is a non-zero power of two.
    pub fn with_size(size: usize) -> Option<Self> {
        size.is_power_of_two().then_some(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mask(&self) -> u64 {
        !self.offset_mask()
    }

    pub fn offset_mask(&self) -> u64 {
        self.size as u64 - 1
    }

    /// Split `address` into its page base and in-page offset.
    pub fn split(&self, address: u64) -> (u64, usize) {
        (address & self.mask(), (address & self.offset_mask()) as usize)
    }

    /// Locate a `T` at `address`: it must be aligned for `T` and must not
    /// cross into the next page.
    pub fn locate<T>(&self, address: u64) -> Result<(u64, usize), IpcError> {
        let (base, offset) = self.split(address);

        if offset + size_of::<T>() > self.size {
            return Err(IpcError::Alignment {
                address,
                detail: format!(
                    "{} bytes at page offset {:#x} cross the {}-byte page boundary",
                    size_of::<T>(),
                    offset,
                    self.size
                ),
            });
        }

        if offset % align_of::<T>() != 0 {
            return Err(IpcError::Alignment {
                address,
                detail: format!("offset {:#x} is not {}-byte aligned", offset, align_of::<T>()),
            });
        }

        Ok((base, offset))
    }
}

/// One mapped page overlaying a `T` at a fixed physical address.
///
/// The window is a non-owning view: it never initializes the `T`, it only
/// exposes whatever the creator placed there. Every field of a
/// [`SharedLayout`] type is an atomic, so reads and writes through the
/// returned reference are explicit loads and stores.
///
/// Each window maps its own page, even when another window in the process
/// already covers the same address. The page is unmapped on drop.
pub struct SharedWindow<T: SharedLayout> {
    // Declared before `_device` so the page is unmapped before the device
    // handle is released.
    mmap: MmapMut,
    block: NonNull<T>,
    address: u64,
    base: u64,
    offset: usize,
    _device: DeviceHandle,
}

// SAFETY: `SharedLayout` types are `Sync` and consist only of atomics, and the
// mapping lives as long as the window.
unsafe impl<T: SharedLayout> Send for SharedWindow<T> {}
unsafe impl<T: SharedLayout> Sync for SharedWindow<T> {}

impl<T: SharedLayout> SharedWindow<T> {
    /// Map the page containing `address` from `device`.
    pub fn map(device: &MemDevice, address: u64) -> Result<Self, IpcError> {
        let page = PageGeometry::system();
        let (base, offset) = page.locate::<T>(address)?;

        tracing::debug!(
            address = format_args!("{address:#x}"),
            base = format_args!("{base:#x}"),
            offset = format_args!("{offset:#x}"),
            page_size = page.size(),
            page_mask = format_args!("{:#x}", page.mask()),
            "Mapping shared window"
        );

        let handle = device.acquire()?;

        // SAFETY: the mapping is shared with another party by design; every
        // access goes through atomics in `T`.
        let mut mmap = unsafe {
            MmapOptions::new()
                .offset(base)
                .len(page.size())
                .map_mut(handle.file())
        }
        .map_err(|source| IpcError::Mapping { base, source })?;

        // SAFETY: `locate` checked that `offset + size_of::<T>()` fits in the
        // page and that `offset` is aligned for `T`; the mapping itself is
        // page aligned and non-null.
        let block = unsafe { NonNull::new_unchecked(mmap.as_mut_ptr().add(offset).cast::<T>()) };

        let window = Self {
            mmap,
            block,
            address,
            base,
            offset,
            _device: handle,
        };

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                mapped_at = ?window.mmap.as_ptr(),
                bytes = %window.hex_dump(),
                "Shared window contents"
            );
        }

        Ok(window)
    }

    pub fn block(&self) -> &T {
        // SAFETY: valid for the lifetime of `self.mmap`, see `map`.
        unsafe { self.block.as_ref() }
    }

    pub fn physical_address(&self) -> u64 {
        self.address
    }

    pub fn page_base(&self) -> u64 {
        self.base
    }

    pub fn page_offset(&self) -> usize {
        self.offset
    }

    pub fn page_len(&self) -> usize {
        self.mmap.len()
    }

    /// Raw bytes of the overlaid `T`, space separated.
    fn hex_dump(&self) -> String {
        let bytes = &self.mmap[self.offset..self.offset + size_of::<T>()];
        let mut out = String::with_capacity(bytes.len() * 3);
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl<T: SharedLayout> Deref for SharedWindow<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.block()
    }
}

impl<T: SharedLayout> std::fmt::Debug for SharedWindow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWindow")
            .field("address", &format_args!("{:#x}", self.address))
            .field("base", &format_args!("{:#x}", self.base))
            .field("offset", &format_args!("{:#x}", self.offset))
            .finish()
    }
}
