//! Register model for the AXI popcount peripheral.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the programmable-logic side: the popcount IP register map,
//! the AXI DMA (simple register mode) MM2S channel that feeds it, and the
//! Linux UIO / u-dma-buf layout the block design is exported through.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Popcount IP register map (reset @ 0x0, count @ 0x4) |
//! | [`dma`] | AXI DMA MM2S registers, status bits, transfer length limit |
//! | [`layout`] | UIO map size, DMA offset, udmabuf sysfs layout |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dma;
pub mod layout;
pub mod regs;
