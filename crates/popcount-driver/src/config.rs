//! Device configuration
//!
//! Defaults describe the stock block design (`/dev/uio0`, DMA at `+0x1000`,
//! `udmabuf0`). Anything else can be overridden in code with the `with_*`
//! builders or from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `POPCOUNT_UIO` | `uio_path` |
//! | `POPCOUNT_UDMABUF` | `udmabuf_name` |
//! | `POPCOUNT_BITSTREAM` | `overlay` (programs this bitstream on open) |
//! | `POPCOUNT_MAX_TRANSFER_WORDS` | `max_transfer_words` |
//! | `POPCOUNT_SYSFS_ROOT` | `sysfs_root` |

use crate::dma::PollConfig;
use crate::error::{PopcountError, Result};
use crate::overlay::OverlayConfig;
use popcount_chip::{dma, layout, regs};
use std::path::PathBuf;

/// Where the peripheral lives and how to drive it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// UIO device node exporting the AXI-Lite window
    pub uio_path: PathBuf,

    /// Bytes of UIO map 0 to map
    pub uio_map_size: usize,

    /// Directory holding the u-dma-buf device nodes
    pub dev_dir: PathBuf,

    /// u-dma-buf instance used as the DMA source buffer
    pub udmabuf_name: String,

    /// Root of sysfs (overridable for tests)
    pub sysfs_root: PathBuf,

    /// Offset of the AXI DMA block inside the UIO window
    pub dma_offset: usize,

    /// Upper bound on words per DMA transfer
    pub max_transfer_words: usize,

    /// Status polling budget for DMA waits
    pub poll: PollConfig,

    /// Bitstream to program before opening the device, if any
    pub overlay: Option<OverlayConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            uio_path: PathBuf::from(layout::DEFAULT_UIO_PATH),
            uio_map_size: layout::UIO_MAP_SIZE,
            dev_dir: PathBuf::from("/dev"),
            udmabuf_name: layout::DEFAULT_UDMABUF.to_string(),
            sysfs_root: PathBuf::from("/sys"),
            dma_offset: layout::DMA_OFFSET,
            max_transfer_words: dma::MAX_TRANSFER_WORDS,
            poll: PollConfig::default(),
            overlay: None,
        }
    }
}

impl DeviceConfig {
    /// Defaults overridden by `POPCOUNT_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `POPCOUNT_*` key
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("POPCOUNT_UIO") {
            config.uio_path = PathBuf::from(path);
        }
        if let Some(name) = lookup("POPCOUNT_UDMABUF") {
            config.udmabuf_name = name;
        }
        if let Some(root) = lookup("POPCOUNT_SYSFS_ROOT") {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(words) = lookup("POPCOUNT_MAX_TRANSFER_WORDS") {
            config.max_transfer_words = words.trim().parse().map_err(|e| {
                PopcountError::invalid_config(format!(
                    "POPCOUNT_MAX_TRANSFER_WORDS={words:?}: {e}"
                ))
            })?;
        }
        if let Some(bitstream) = lookup("POPCOUNT_BITSTREAM") {
            config.overlay = Some(
                OverlayConfig::new(bitstream).with_sysfs_root(config.sysfs_root.clone()),
            );
        }

        tracing::debug!("Device config: {config:?}");
        Ok(config)
    }

    /// Use a different UIO device node
    #[must_use]
    pub fn with_uio_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uio_path = path.into();
        self
    }

    /// Use a different u-dma-buf instance
    #[must_use]
    pub fn with_udmabuf(mut self, name: impl Into<String>) -> Self {
        self.udmabuf_name = name.into();
        self
    }

    /// Use a different sysfs root
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Move the DMA register block within the UIO map
    #[must_use]
    pub const fn with_dma_offset(mut self, offset: usize) -> Self {
        self.dma_offset = offset;
        self
    }

    /// Cap the number of words per DMA transfer
    #[must_use]
    pub const fn with_max_transfer_words(mut self, words: usize) -> Self {
        self.max_transfer_words = words;
        self
    }

    /// Change the DMA polling budget
    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Program `overlay` before opening the device
    #[must_use]
    pub fn with_overlay(mut self, overlay: OverlayConfig) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Check the configuration before touching hardware
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if:
    /// - `max_transfer_words` is zero or above the DMA LENGTH limit
    /// - `dma_offset` is unaligned, overlaps the popcount registers, or the
    ///   DMA block does not fit in the UIO map
    /// - `poll.max_polls` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_transfer_words == 0 {
            return Err(PopcountError::invalid_config("max_transfer_words must be > 0"));
        }
        if self.max_transfer_words > dma::MAX_TRANSFER_WORDS {
            return Err(PopcountError::invalid_config(format!(
                "max_transfer_words {} exceeds DMA limit of {} words",
                self.max_transfer_words,
                dma::MAX_TRANSFER_WORDS
            )));
        }
        if self.dma_offset % 4 != 0 {
            return Err(PopcountError::invalid_config(format!(
                "dma_offset {:#x} is not word aligned",
                self.dma_offset
            )));
        }
        if self.dma_offset < layout::POPCOUNT_OFFSET + regs::BLOCK_SIZE {
            return Err(PopcountError::invalid_config(format!(
                "dma_offset {:#x} overlaps the popcount registers",
                self.dma_offset
            )));
        }
        if self
            .dma_offset
            .checked_add(dma::MM2S_BLOCK_SIZE)
            .map_or(true, |end| end > self.uio_map_size)
        {
            return Err(PopcountError::invalid_config(format!(
                "DMA block at {:#x} does not fit in {:#x}-byte UIO map",
                self.dma_offset, self.uio_map_size
            )));
        }
        if self.poll.max_polls == 0 {
            return Err(PopcountError::invalid_config("poll.max_polls must be > 0"));
        }
        Ok(())
    }
}
