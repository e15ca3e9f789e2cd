//! Popcount backend implementations
//!
//! Three backends available:
//! - **Mmio**: one register write per word through the UIO window
//! - **Dma**: chunked AXI DMA transfers from a u-dma-buf buffer
//! - **Software**: CPU reference counter (CI, parity baseline)
//!
//! The two hardware backends share the popcount register block: reset and
//! readback always go through AXI-Lite, only the data path differs.

pub mod dma;
pub mod mmio;
pub mod software;

pub use dma::DmaBackend;
pub use mmio::MmioBackend;
pub use software::SoftwareBackend;

use crate::error::Result;
use crate::mmio::RegisterIo;
use popcount_chip::regs;

/// Clear the hardware accumulator
pub(crate) fn reset_counter<R: RegisterIo>(regs: &mut R) -> Result<()> {
    tracing::debug!("Resetting popcount accumulator");
    regs.write_u32(regs::RESET, regs::RESET_ASSERT)
}

/// Read the hardware accumulator
pub(crate) fn read_counter<R: RegisterIo>(regs: &R) -> Result<u32> {
    regs.read_u32(regs::COUNT)
}
