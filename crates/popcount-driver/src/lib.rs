//! Userspace driver for the FPGA popcount peripheral.
//!
//! The programmable-logic overlay contains a popcount IP (a running 32-bit
//! count of set bits) and an AXI DMA core feeding it over AXI4-Stream. This
//! crate drives both from Linux userspace through UIO and u-dma-buf; no
//! kernel driver beyond those two modules is needed.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   DmaBackend      - chunked AXI DMA MM2S transfers (bulk data)
//!   MmioBackend     - one AXI-Lite register write per word
//!
//! Reference:
//!   SoftwareBackend - CPU popcount, same wrapping 32-bit semantics
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use popcount_driver::{BackendType, DeviceConfig, HardwarePopcount};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::from_env()?;
//! let mut pc = HardwarePopcount::open(BackendType::Dma, &config)?;
//!
//! println!("{}", pc.count_int(0xF0F0_F0F0)?);
//! println!("Counted {} ones", pc.count_file("input.bin")?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod config;
mod discovery;
pub mod dma;
mod error;
pub mod mmio;
pub mod overlay;
mod popcount;
pub mod sim;
pub mod udmabuf;

/// Block design layout (re-exported from popcount-chip).
pub use popcount_chip::layout;

pub use backend::{select_backend, BackendType, PopcountBackend};
pub use backends::{DmaBackend, MmioBackend, SoftwareBackend};
pub use config::DeviceConfig;
pub use discovery::{discover_udmabufs, discover_uio, find_uio_by_name, UioDevice};
pub use dma::{AxiDma, PollConfig};
pub use error::{PopcountError, Result};
pub use mmio::{RegisterIo, SubRegion, UioRegion};
pub use overlay::{Overlay, OverlayConfig};
pub use popcount::{words_from_bytes, HardwarePopcount};
pub use sim::{SimBuffer, SimulatedFabric};
pub use udmabuf::{TransferBuffer, UdmaBufInfo, UdmaBuffer};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BackendType, DeviceConfig, HardwarePopcount, PopcountBackend, PopcountError, Result,
    };
}
