//! Memory-mapped register access through Linux UIO
//!
//! The block design exports its AXI-Lite window as `/dev/uioN`. Map 0 of that
//! device covers both the popcount IP and the AXI DMA register blocks.
//!
//! Everything above this module talks to registers through [`RegisterIo`], so
//! the same backend code runs against a real [`UioRegion`] or an in-memory
//! register file in tests.

use crate::error::{PopcountError, Result};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// 32-bit register access
///
/// Offsets are byte offsets from the start of the window. Implementations
/// bounds-check every access and return an error instead of panicking.
pub trait RegisterIo {
    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns error if the offset is out of bounds.
    fn read_u32(&self, offset: usize) -> Result<u32>;

    /// Write a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns error if the offset is out of bounds.
    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()>;
}

impl<R: RegisterIo + ?Sized> RegisterIo for &mut R {
    fn read_u32(&self, offset: usize) -> Result<u32> {
        (**self).read_u32(offset)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        (**self).write_u32(offset, value)
    }
}

fn check_bounds(offset: usize, len: usize, limit: usize, op: &str) -> Result<()> {
    if offset % 4 != 0 {
        return Err(PopcountError::transfer_failed(format!(
            "Unaligned {op}: offset={offset:#x}"
        )));
    }
    if offset.checked_add(len).map_or(true, |end| end > limit) {
        return Err(PopcountError::transfer_failed(format!(
            "Out of bounds {op}: offset={offset:#x}, size={len}, limit={limit:#x}"
        )));
    }
    Ok(())
}

/// Memory-mapped UIO register window
///
/// Owns the mapping and the open device file; the mapping is released on drop.
#[derive(Debug)]
pub struct UioRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl UioRegion {
    /// Map `size` bytes of UIO map 0 from `path` (e.g. `/dev/uio0`)
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The device node doesn't exist
    /// - The device node cannot be opened read/write
    /// - mmap fails
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PopcountError::device_not_found(path));
        }
        if size == 0 {
            return Err(PopcountError::invalid_config("UIO map size is 0"));
        }

        tracing::debug!("Mapping UIO: {} ({size:#x} bytes)", path.display());

        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(path)
            .map_err(|e| {
                PopcountError::transfer_failed(format!("Cannot open {}: {e}", path.display()))
            })?;

        // SAFETY: mmap of a UIO device node.
        // - fd is valid (just opened, kept alive in `_file`)
        // - size is non-zero (checked above)
        // - MAP_SHARED with offset 0 selects UIO map 0
        // - the mapping is released exactly once in Drop
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
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

        tracing::info!("Mapped {} at {ptr:p}, size={size:#x}", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Read the size of map 0 for `uio` (e.g. `uio0`) from sysfs
    ///
    /// The attribute holds a hex value such as `0x00010000`.
    ///
    /// # Errors
    ///
    /// Returns error if the attribute is missing or malformed.
    pub fn size_from_sysfs(sysfs_root: impl AsRef<Path>, uio: &str) -> Result<usize> {
        let attr = sysfs_root
            .as_ref()
            .join(popcount_chip::layout::UIO_CLASS)
            .join(uio)
            .join("maps/map0/size");
        let text = std::fs::read_to_string(&attr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PopcountError::device_not_found(&attr)
            } else {
                e.into()
            }
        })?;
        parse_hex(text.trim()).ok_or_else(|| {
            PopcountError::invalid_state(format!("Malformed {}: {text:?}", attr.display()))
        })
    }

    /// Get mapping size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get device node path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterIo for UioRegion {
    fn read_u32(&self, offset: usize) -> Result<u32> {
        check_bounds(offset, 4, self.size, "read")?;

        // SAFETY: volatile read of a device register.
        // - offset + 4 <= size and offset is 4-byte aligned (checked above)
        // - ptr comes from a successful mmap and is page aligned
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        check_bounds(offset, 4, self.size, "write")?;

        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");

        // SAFETY: volatile write of a device register; same invariants as
        // read_u32. Writes must not be elided or reordered: each one is
        // consumed by the hardware.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }
}

impl Drop for UioRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {} ({:#x} bytes)", self.path.display(), self.size);

        // SAFETY: ptr/size are exactly what mmap returned in open().
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: UioRegion owns its mapping exclusively; moving it between threads
// does not invalidate the mapping.
unsafe impl Send for UioRegion {}

// SAFETY: reads are bounds-checked volatile loads; writes need &mut self.
unsafe impl Sync for UioRegion {}

/// Register window at a fixed base offset inside another window
///
/// Used to address the AXI DMA block at `+0x1000` inside the UIO map without
/// a second mapping.
#[derive(Debug)]
pub struct SubRegion<R> {
    inner: R,
    base: usize,
    size: usize,
}

impl<R: RegisterIo> SubRegion<R> {
    /// Create a window of `size` bytes starting at `base`
    pub const fn new(inner: R, base: usize, size: usize) -> Self {
        Self { inner, base, size }
    }
}

impl<R: RegisterIo> RegisterIo for SubRegion<R> {
    fn read_u32(&self, offset: usize) -> Result<u32> {
        check_bounds(offset, 4, self.size, "read")?;
        self.inner.read_u32(self.base + offset)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        check_bounds(offset, 4, self.size, "write")?;
        self.inner.write_u32(self.base + offset, value)
    }
}

/// Parse a sysfs hex attribute (`0x1000` or `1000`)
pub(crate) fn parse_hex(text: &str) -> Option<usize> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    usize::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Plain register file
    #[derive(Debug, Default)]
    struct Regs {
        values: BTreeMap<usize, u32>,
    }

    impl RegisterIo for Regs {
        fn read_u32(&self, offset: usize) -> Result<u32> {
            check_bounds(offset, 4, 0x2000, "read")?;
            Ok(self.values.get(&offset).copied().unwrap_or(0))
        }

        fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
            check_bounds(offset, 4, 0x2000, "write")?;
            self.values.insert(offset, value);
            Ok(())
        }
    }

    #[test]
    fn sub_region_offsets_into_parent() {
        let mut regs = Regs::default();
        {
            let mut sub = SubRegion::new(&mut regs, 0x1000, 0x30);
            sub.write_u32(0x28, 0xABCD).unwrap();
            assert_eq!(sub.read_u32(0x28).unwrap(), 0xABCD);
        }
        assert_eq!(regs.read_u32(0x1028).unwrap(), 0xABCD);
    }

    #[test]
    fn sub_region_rejects_out_of_window() {
        let mut regs = Regs::default();
        let mut sub = SubRegion::new(&mut regs, 0x1000, 0x30);
        assert!(sub.write_u32(0x30, 1).is_err());
        assert!(sub.read_u32(0x2).is_err());
    }

    #[test]
    fn bounds_check_handles_overflow() {
        assert!(check_bounds(usize::MAX - 1, 4, 0x1000, "read").is_err());
        assert!(check_bounds(0xFFC, 4, 0x1000, "read").is_ok());
        assert!(check_bounds(0x1000, 4, 0x1000, "read").is_err());
    }

    #[test]
    fn parse_hex_accepts_sysfs_forms() {
        assert_eq!(parse_hex("0x00010000"), Some(0x10000));
        assert_eq!(parse_hex("0X1000"), Some(0x1000));
        assert_eq!(parse_hex("1000"), Some(0x1000));
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn size_from_sysfs_reads_map0() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("class/uio/uio0/maps/map0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("size"), "0x00010000\n").unwrap();

        assert_eq!(UioRegion::size_from_sysfs(root.path(), "uio0").unwrap(), 0x10000);
        assert!(matches!(
            UioRegion::size_from_sysfs(root.path(), "uio7"),
            Err(PopcountError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn open_missing_device_fails() {
        let err = UioRegion::open("/nonexistent/uio42", 0x1000).unwrap_err();
        assert!(matches!(err, PopcountError::DeviceNotFound { .. }));
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_map_uio0() {
        let region = UioRegion::open("/dev/uio0", popcount_chip::layout::UIO_MAP_SIZE)
            .expect("map /dev/uio0");
        let count = region.read_u32(popcount_chip::regs::COUNT).unwrap();
        println!("COUNT = {count}");
    }
}
