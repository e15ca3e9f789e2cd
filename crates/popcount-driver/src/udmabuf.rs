//! Physically contiguous DMA transfer buffers
//!
//! The AXI DMA engine reads from physical memory, so the data has to sit in a
//! buffer whose physical address is known. On the target this comes from the
//! `u-dma-buf` kernel module:
//!
//! ```text
//! /dev/udmabuf0                                  mmap'able buffer
//! /sys/class/u-dma-buf/udmabuf0/phys_addr        hex physical address
//! /sys/class/u-dma-buf/udmabuf0/size             decimal size in bytes
//! ```

use crate::error::{PopcountError, Result};
use crate::mmio::parse_hex;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Memory the DMA engine can read from
pub trait TransferBuffer {
    /// Device-visible (physical) address of the first byte
    fn phys_addr(&self) -> u64;

    /// Usable size in bytes
    fn capacity(&self) -> usize;

    /// Copy `data` into the buffer at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the write would run past [`capacity`](Self::capacity).
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

pub(crate) fn check_capacity(offset: usize, len: usize, capacity: usize) -> Result<()> {
    if offset.checked_add(len).map_or(true, |end| end > capacity) {
        return Err(PopcountError::transfer_failed(format!(
            "Out of bounds buffer write: offset={offset:#x}, size={len}, capacity={capacity:#x}"
        )));
    }
    Ok(())
}

/// sysfs attributes describing one u-dma-buf instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdmaBufInfo {
    /// Instance name (`udmabuf0`)
    pub name: String,
    /// Physical address of the buffer
    pub phys_addr: u64,
    /// Size of the buffer in bytes
    pub size: usize,
}

impl UdmaBufInfo {
    /// Read `phys_addr` and `size` for `name` below `sysfs_root`
    ///
    /// # Errors
    ///
    /// Returns error if the instance does not exist or an attribute is
    /// malformed.
    pub fn query(sysfs_root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = sysfs_root
            .as_ref()
            .join(popcount_chip::layout::UDMABUF_CLASS)
            .join(name);
        if !dir.is_dir() {
            return Err(PopcountError::device_not_found(dir));
        }

        let phys_text = read_attr(&dir.join("phys_addr"))?;
        let phys_addr = parse_hex(&phys_text).ok_or_else(|| {
            PopcountError::invalid_state(format!("Malformed {name}/phys_addr: {phys_text:?}"))
        })? as u64;

        let size_text = read_attr(&dir.join("size"))?;
        let size = size_text.parse::<usize>().map_err(|e| {
            PopcountError::invalid_state(format!("Malformed {name}/size {size_text:?}: {e}"))
        })?;

        tracing::debug!("{name}: phys_addr={phys_addr:#x}, size={size}");

        Ok(Self {
            name: name.to_string(),
            phys_addr,
            size,
        })
    }
}

fn read_attr(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PopcountError::device_not_found(path))
        }
        Err(e) => Err(e.into()),
    }
}

/// Mapped u-dma-buf instance
#[derive(Debug)]
pub struct UdmaBuffer {
    ptr: NonNull<u8>,
    len: usize,
    phys_addr: u64,
    _file: File,
    path: PathBuf,
}

impl UdmaBuffer {
    /// Open `/dev/<name>` and map at most `max_len` bytes of it
    ///
    /// The mapped length is the smaller of the buffer size reported by sysfs
    /// and `max_len`.
    ///
    /// # Errors
    ///
    /// Returns error if the sysfs attributes cannot be read, the device node
    /// cannot be opened, or mmap fails.
    pub fn open(
        dev_dir: impl AsRef<Path>,
        sysfs_root: impl AsRef<Path>,
        name: &str,
        max_len: usize,
    ) -> Result<Self> {
        let info = UdmaBufInfo::query(sysfs_root, name)?;
        let len = info.size.min(max_len);
        if len == 0 {
            return Err(PopcountError::invalid_state(format!("{name} has zero usable size")));
        }

        let path = dev_dir.as_ref().join(name);

        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(&path)
            .map_err(|e| {
                PopcountError::transfer_failed(format!("Cannot open {}: {e}", path.display()))
            })?;

        // SAFETY: mmap of a u-dma-buf device node.
        // - fd is valid and kept open for the lifetime of the mapping
        // - len is non-zero and no larger than the buffer size sysfs reports
        // - unmapped exactly once in Drop
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| {
            PopcountError::transfer_failed(format!("mmap of {} failed: {e}", path.display()))
        })?;

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            PopcountError::transfer_failed(format!("mmap of {} returned null", path.display()))
        })?;

        tracing::info!(
            "Mapped {} at {ptr:p} (phys {:#x}), {len} of {} bytes",
            path.display(),
            info.phys_addr,
            info.size
        );

        Ok(Self {
            ptr,
            len,
            phys_addr: info.phys_addr,
            _file: file,
            path,
        })
    }

    /// Device node path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransferBuffer for UdmaBuffer {
    fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    fn capacity(&self) -> usize {
        self.len
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_capacity(offset, data.len(), self.len)?;

        // SAFETY: bounds validated above; dst lies inside the mapping and src
        // is a caller slice in ordinary memory, so they cannot overlap.
        unsafe {
            let dst = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }
}

impl Drop for UdmaBuffer {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {} ({} bytes)", self.path.display(), self.len);

        // SAFETY: ptr/len are exactly what mmap returned in open().
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: UdmaBuffer owns its mapping exclusively; CPU access needs &mut self.
unsafe impl Send for UdmaBuffer {}
