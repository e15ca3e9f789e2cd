//! MMIO backend: one AXI-Lite write per word
//!
//! There is no handshake: each write to `COUNT` is consumed by the IP and the
//! total is whatever `COUNT` reads after the last write.

use super::{read_counter, reset_counter};
use crate::backend::{BackendType, PopcountBackend};
use crate::config::DeviceConfig;
use crate::error::Result;
use crate::mmio::{RegisterIo, UioRegion};
use popcount_chip::regs;
use std::fmt::Debug;

/// Register-write backend
#[derive(Debug)]
pub struct MmioBackend<R = UioRegion> {
    regs: R,
}

impl MmioBackend<UioRegion> {
    /// Map the UIO window described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the UIO device cannot
    /// be mapped.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("Initializing MMIO backend on {}", config.uio_path.display());
        let regs = UioRegion::open(&config.uio_path, config.uio_map_size)?;
        Ok(Self::new(regs))
    }
}

impl<R: RegisterIo> MmioBackend<R> {
    /// Drive an already-mapped register window
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }
}

impl<R: RegisterIo + Debug + Send> PopcountBackend for MmioBackend<R> {
    fn reset(&mut self) -> Result<()> {
        reset_counter(&mut self.regs)
    }

    fn stream(&mut self, words: &[u32]) -> Result<()> {
        tracing::debug!("Writing {} words via MMIO", words.len());
        for &word in words {
            self.regs.write_u32(regs::COUNT, word)?;
        }
        Ok(())
    }

    fn count(&self) -> Result<u32> {
        read_counter(&self.regs)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmio
    }

    fn is_ready(&self) -> bool {
        read_counter(&self.regs).is_ok()
    }
}
