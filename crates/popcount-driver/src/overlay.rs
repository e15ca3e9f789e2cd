//! Overlay (bitstream) loading through the Linux FPGA manager
//!
//! The bitstream itself is opaque: this module only hands it to the kernel
//! and waits until the fabric reports `operating`.
//!
//! ```text
//! cp popcount.bit /lib/firmware/
//! echo 0 > /sys/class/fpga_manager/fpga0/flags            # full reconfiguration
//! echo popcount.bit > /sys/class/fpga_manager/fpga0/firmware
//! cat /sys/class/fpga_manager/fpga0/state                 # "operating"
//! ```

use anyhow::{bail, Context, Result};
use popcount_chip::layout;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// FPGA manager state once a bitstream is running
pub const STATE_OPERATING: &str = "operating";

/// How to program an overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Bitstream file to load
    pub bitstream: PathBuf,
    /// FPGA manager instance (`fpga0`)
    pub manager: String,
    /// Directory the FPGA manager loads firmware from
    pub firmware_dir: PathBuf,
    /// Root of sysfs
    pub sysfs_root: PathBuf,
    /// Value written to the manager's `flags` attribute (0 = full bitstream)
    pub flags: u32,
    /// How long to wait for the `operating` state
    pub timeout: Duration,
}

impl OverlayConfig {
    /// Program `bitstream` on the default manager
    pub fn new(bitstream: impl Into<PathBuf>) -> Self {
        Self {
            bitstream: bitstream.into(),
            manager: layout::DEFAULT_FPGA_MANAGER.to_string(),
            firmware_dir: PathBuf::from(layout::FIRMWARE_DIR),
            sysfs_root: PathBuf::from("/sys"),
            flags: 0,
            timeout: Duration::from_secs(5),
        }
    }

    /// Use a different FPGA manager instance
    #[must_use]
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    /// Use a different firmware directory
    #[must_use]
    pub fn with_firmware_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.firmware_dir = dir.into();
        self
    }

    /// Use a different sysfs root
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Change how long to wait for the fabric to come up
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A programmed overlay
#[derive(Debug)]
pub struct Overlay {
    manager_dir: PathBuf,
    firmware: String,
}

impl Overlay {
    /// Load `config.bitstream` into the fabric and wait until it is operating
    ///
    /// # Errors
    ///
    /// Returns error if the bitstream is missing, the firmware directory or
    /// manager attributes cannot be written (usually permissions), or the
    /// manager does not reach `operating` within the timeout.
    pub fn program(config: &OverlayConfig) -> Result<Self> {
        let manager_dir = manager_dir(&config.sysfs_root, &config.manager);
        if !manager_dir.is_dir() {
            bail!("FPGA manager {} not found at {}", config.manager, manager_dir.display());
        }

        let file_name = config
            .bitstream
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Bad bitstream path: {}", config.bitstream.display()))?
            .to_string();

        info!("Programming {} with {}", config.manager, config.bitstream.display());

        let staged = config.firmware_dir.join(&file_name);
        if !same_file(&config.bitstream, &staged) {
            fs::copy(&config.bitstream, &staged).with_context(|| {
                format!(
                    "Cannot copy {} to {}",
                    config.bitstream.display(),
                    staged.display()
                )
            })?;
            debug!("Staged bitstream at {}", staged.display());
        }

        let flags = manager_dir.join("flags");
        fs::write(&flags, config.flags.to_string())
            .with_context(|| format!("Cannot write {}", flags.display()))?;

        let firmware = manager_dir.join("firmware");
        fs::write(&firmware, &file_name)
            .with_context(|| format!("Cannot write {}", firmware.display()))?;

        wait_for_state(&manager_dir, STATE_OPERATING, config.timeout)?;

        info!("{} is {STATE_OPERATING}", config.manager);
        Ok(Self {
            manager_dir,
            firmware: file_name,
        })
    }

    /// Read the current state of FPGA manager `manager`
    ///
    /// # Errors
    ///
    /// Returns error if the manager does not exist.
    pub fn state(sysfs_root: impl AsRef<Path>, manager: &str) -> Result<String> {
        read_state(&manager_dir(sysfs_root.as_ref(), manager))
    }

    /// Whether the fabric still reports `operating`
    pub fn is_operating(&self) -> bool {
        read_state(&self.manager_dir).is_ok_and(|s| s == STATE_OPERATING)
    }

    /// Firmware file name that was loaded
    pub fn firmware(&self) -> &str {
        &self.firmware
    }
}

fn manager_dir(sysfs_root: &Path, manager: &str) -> PathBuf {
    sysfs_root.join(layout::FPGA_MANAGER_CLASS).join(manager)
}

fn read_state(manager_dir: &Path) -> Result<String> {
    let path = manager_dir.join("state");
    let state = fs::read_to_string(&path).with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(state.trim().to_string())
}

fn wait_for_state(manager_dir: &Path, want: &str, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let state = read_state(manager_dir)?;
        if state == want {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            bail!("FPGA manager stuck in state {state:?} after {timeout:?} (want {want:?})");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
