//! Backend abstraction for the popcount peripheral
//!
//! A backend is one way of getting words into the hardware accumulator:
//! register writes, DMA bursts, or (for CI and parity checks) plain CPU
//! arithmetic.

use crate::config::DeviceConfig;
use crate::error::{PopcountError, Result};
use std::fmt::Debug;
use std::str::FromStr;

/// Popcount backend trait - unified interface over the transports
///
/// The accumulator semantics are the hardware's: [`stream`](Self::stream)
/// adds to the running total, [`reset`](Self::reset) clears it, and
/// [`count`](Self::count) reads it without side effects.
pub trait PopcountBackend: Debug + Send {
    /// Clear the accumulator
    ///
    /// # Errors
    ///
    /// Returns error if the reset register cannot be written.
    fn reset(&mut self) -> Result<()>;

    /// Feed `words` to the counter, in order
    ///
    /// # Errors
    ///
    /// Returns error if a register write or DMA transfer fails.
    fn stream(&mut self, words: &[u32]) -> Result<()>;

    /// Read the accumulator
    ///
    /// # Errors
    ///
    /// Returns error if the count register cannot be read.
    fn count(&self) -> Result<u32>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// Check if backend is ready
    fn is_ready(&self) -> bool;
}

/// Backend type identifier (the transport "mode")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// One AXI-Lite register write per word
    Mmio,

    /// AXI DMA MM2S bursts from a u-dma-buf buffer
    Dma,

    /// CPU reference counter, no hardware required
    Software,
}

impl BackendType {
    /// All backend types, hardware first
    pub const ALL: [Self; 3] = [Self::Mmio, Self::Dma, Self::Software];

    /// Whether this backend needs the FPGA
    pub const fn is_hardware(self) -> bool {
        matches!(self, Self::Mmio | Self::Dma)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Mmio => "mmio",
            Self::Dma => "dma",
            Self::Software => "software",
        })
    }
}

impl FromStr for BackendType {
    type Err = PopcountError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mmio" => Ok(Self::Mmio),
            "dma" => Ok(Self::Dma),
            "software" | "sw" => Ok(Self::Software),
            other => Err(PopcountError::invalid_config(format!(
                "Unknown mode {other:?} (expected mmio, dma or software)"
            ))),
        }
    }
}

/// Open the backend for `selection` using `config`
///
/// # Errors
///
/// Returns error if the configuration is invalid or the hardware backing the
/// selected transport cannot be opened.
pub fn select_backend(
    selection: BackendType,
    config: &DeviceConfig,
) -> Result<Box<dyn PopcountBackend>> {
    use crate::backends::{DmaBackend, MmioBackend, SoftwareBackend};

    let backend: Box<dyn PopcountBackend> = match selection {
        BackendType::Mmio => Box::new(MmioBackend::open(config)?),
        BackendType::Dma => Box::new(DmaBackend::open(config)?),
        BackendType::Software => Box::new(SoftwareBackend::new()),
    };

    tracing::info!("Using {selection} backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!("mmio".parse::<BackendType>().unwrap(), BackendType::Mmio);
        assert_eq!("DMA".parse::<BackendType>().unwrap(), BackendType::Dma);
        assert_eq!("sw".parse::<BackendType>().unwrap(), BackendType::Software);
        assert!("pio".parse::<BackendType>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for mode in BackendType::ALL {
            assert_eq!(mode.to_string().parse::<BackendType>().unwrap(), mode);
        }
    }

    #[test]
    fn software_selection_needs_no_hardware() {
        let backend = select_backend(BackendType::Software, &DeviceConfig::default()).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Software);
        assert!(backend.is_ready());
        assert!(!BackendType::Software.is_hardware());
    }

    #[test]
    fn mmio_selection_fails_without_uio() {
        let config = DeviceConfig::default().with_uio_path("/nonexistent/uio9");
        let err = select_backend(BackendType::Mmio, &config).unwrap_err();
        assert!(matches!(err, PopcountError::DeviceNotFound { .. }));
    }
}
