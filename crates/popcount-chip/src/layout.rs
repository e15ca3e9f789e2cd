//! UIO window and u-dma-buf layout of the block design.
//!
//! The whole AXI-Lite address space of the design is exported as one UIO map:
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────┐
//!             │ axi_popcount_0       │  RESET / COUNT
//! 0x0000_1000 ├──────────────────────┤
//!             │ axi_dma_0 (MM2S)     │  DMACR / DMASR / SA / LENGTH
//! 0x0001_0000 └──────────────────────┘
//! ```
//!
//! Offsets come from the Vivado block design address map. The map size is the
//! value found in `/sys/class/uio/uio0/maps/map0/size`.

/// Default UIO device node.
pub const DEFAULT_UIO_PATH: &str = "/dev/uio0";

/// Default size of UIO map 0.
pub const UIO_MAP_SIZE: usize = 0x0001_0000;

/// Offset of the popcount register block inside the UIO map.
pub const POPCOUNT_OFFSET: usize = 0x0000;

/// Offset of the AXI DMA register block inside the UIO map.
pub const DMA_OFFSET: usize = 0x0000_1000;

/// Default u-dma-buf instance name (`/dev/udmabuf0`).
pub const DEFAULT_UDMABUF: &str = "udmabuf0";

/// sysfs class directory for u-dma-buf instances, relative to the sysfs root.
pub const UDMABUF_CLASS: &str = "class/u-dma-buf";

/// sysfs class directory for UIO devices, relative to the sysfs root.
pub const UIO_CLASS: &str = "class/uio";

/// sysfs class directory for FPGA managers, relative to the sysfs root.
pub const FPGA_MANAGER_CLASS: &str = "class/fpga_manager";

/// Default FPGA manager instance.
pub const DEFAULT_FPGA_MANAGER: &str = "fpga0";

/// Default bitstream file name.
pub const DEFAULT_BITSTREAM: &str = "bitstream.bit";

/// Default firmware search directory used by the FPGA manager.
pub const FIRMWARE_DIR: &str = "/lib/firmware";
