//! Runtime device discovery
//!
//! Scans sysfs for UIO devices and u-dma-buf instances instead of assuming
//! `/dev/uio0`: on boards with more than one UIO-exported block the popcount
//! window can land on any index.

use crate::error::{PopcountError, Result};
use crate::mmio::UioRegion;
use crate::udmabuf::UdmaBufInfo;
use popcount_chip::layout;
use std::fs;
use std::path::{Path, PathBuf};

/// A UIO device found in sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UioDevice {
    /// Device index (the `N` in `uioN`)
    pub index: usize,

    /// Name the device-tree node gave the device
    pub name: String,

    /// Device node (`/dev/uioN`)
    pub path: PathBuf,

    /// Size of map 0, if the device exports one
    pub map_size: Option<usize>,
}

/// List UIO devices below `sysfs_root`, ordered by index
///
/// A missing `class/uio` directory means no devices, not an error.
///
/// # Errors
///
/// Returns error if the class directory exists but cannot be read.
pub fn discover_uio(sysfs_root: impl AsRef<Path>) -> Result<Vec<UioDevice>> {
    let sysfs_root = sysfs_root.as_ref();
    let mut devices = Vec::new();

    for entry in class_entries(&sysfs_root.join(layout::UIO_CLASS))? {
        let Some(index) = entry
            .strip_prefix("uio")
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };

        let dir = sysfs_root.join(layout::UIO_CLASS).join(&entry);
        let name = fs::read_to_string(dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let map_size = match UioRegion::size_from_sysfs(sysfs_root, &entry) {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::debug!("{entry}: no usable map0 ({e})");
                None
            }
        };

        tracing::debug!("Found {entry} ({name:?}, map0 {map_size:?})");
        devices.push(UioDevice {
            index,
            name,
            path: PathBuf::from("/dev").join(&entry),
            map_size,
        });
    }

    devices.sort_by_key(|d| d.index);
    tracing::info!("Discovered {} UIO device(s)", devices.len());
    Ok(devices)
}

/// Find the UIO device whose `name` attribute equals `name`
///
/// # Errors
///
/// Returns `DeviceNotFound` if no device matches.
pub fn find_uio_by_name(sysfs_root: impl AsRef<Path>, name: &str) -> Result<UioDevice> {
    let sysfs_root = sysfs_root.as_ref();
    discover_uio(sysfs_root)?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| {
            PopcountError::device_not_found(sysfs_root.join(layout::UIO_CLASS).join(name))
        })
}

/// List u-dma-buf instances below `sysfs_root`, ordered by name
///
/// Instances whose attributes cannot be parsed are skipped with a warning.
///
/// # Errors
///
/// Returns error if the class directory exists but cannot be read.
pub fn discover_udmabufs(sysfs_root: impl AsRef<Path>) -> Result<Vec<UdmaBufInfo>> {
    let sysfs_root = sysfs_root.as_ref();
    let mut buffers = Vec::new();

    for name in class_entries(&sysfs_root.join(layout::UDMABUF_CLASS))? {
        match UdmaBufInfo::query(sysfs_root, &name) {
            Ok(info) => buffers.push(info),
            Err(e) => tracing::warn!("Skipping u-dma-buf {name}: {e}"),
        }
    }

    buffers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(buffers)
}

fn class_entries(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
