//! AXI DMA v7.1 register map, MM2S channel in direct register mode.
//!
//! Source: *AXI DMA LogiCORE IP Product Guide* (PG021), "Programming
//! Sequence - Direct Register Mode (Simple DMA)". Only the memory-to-stream
//! half is used; the popcount IP consumes the AXI4-Stream and never answers
//! on S2MM.
//!
//! ```text
//! 1. DMACR.RS = 1, wait for DMASR.Halted = 0
//! 2. DMACR.IOC_IrqEn = DMACR.Err_IrqEn = 0 (completion is polled)
//! 3. SA = source physical address
//! 4. LENGTH = bytes; the write starts the transfer
//! 5. poll DMASR.Idle
//! 6. DMASR.IOC_Irq = 1 to clear the latched completion flag
//! ```

// ── MM2S registers (offsets relative to the DMA block) ──────────────────────

/// MM2S DMA control register.
pub const MM2S_DMACR: usize = 0x00;
/// MM2S DMA status register.
pub const MM2S_DMASR: usize = 0x04;
/// MM2S source address, low 32 bits.
pub const MM2S_SA: usize = 0x18;
/// MM2S source address, high 32 bits (only with > 32-bit addressing).
pub const MM2S_SA_MSB: usize = 0x1C;
/// MM2S transfer length in bytes. A non-zero write starts the transfer.
pub const MM2S_LENGTH: usize = 0x28;

/// Span of the MM2S register block in bytes.
pub const MM2S_BLOCK_SIZE: usize = 0x30;

// ── DMACR bits ──────────────────────────────────────────────────────────────

/// DMACR bit definitions.
pub mod control {
    /// Run/Stop. 1 = run, 0 = stop after the current transfer.
    pub const RS: u32 = 1 << 0;
    /// Soft reset of the whole DMA core. Self-clearing.
    pub const RESET: u32 = 1 << 2;
    /// Interrupt on complete enable.
    pub const IOC_IRQ_EN: u32 = 1 << 12;
    /// Error interrupt enable.
    pub const ERR_IRQ_EN: u32 = 1 << 14;
}

// ── DMASR bits ──────────────────────────────────────────────────────────────

/// DMASR bit definitions.
pub mod status {
    /// Channel halted (RS = 0 and all transfers drained).
    pub const HALTED: u32 = 1 << 0;
    /// Channel idle: the last programmed transfer has completed.
    pub const IDLE: u32 = 1 << 1;
    /// DMA internal error (e.g. zero-length transfer).
    pub const DMA_INT_ERR: u32 = 1 << 4;
    /// AXI slave error on the memory-map side.
    pub const DMA_SLV_ERR: u32 = 1 << 5;
    /// AXI decode error on the memory-map side.
    pub const DMA_DEC_ERR: u32 = 1 << 6;
    /// Interrupt on complete. Write 1 to clear.
    pub const IOC_IRQ: u32 = 1 << 12;
    /// Error interrupt. Write 1 to clear.
    pub const ERR_IRQ: u32 = 1 << 14;

    /// Any of the error bits.
    pub const ERROR_MASK: u32 = DMA_INT_ERR | DMA_SLV_ERR | DMA_DEC_ERR;
}

// ── Transfer limits ─────────────────────────────────────────────────────────

/// Width of the LENGTH register in the block design (`c_sg_length_width`).
pub const LENGTH_WIDTH_BITS: u32 = 14;

/// Largest byte count a single transfer can move.
pub const MAX_TRANSFER_BYTES: usize = (1 << LENGTH_WIDTH_BITS) - 1;

/// Largest whole number of 32-bit words per transfer (4095 words, 16380 bytes).
pub const MAX_TRANSFER_WORDS: usize = MAX_TRANSFER_BYTES / 4;

/// Decode the error bits of a DMASR value into a short description.
///
/// Returns `None` when no error bit is set.
pub fn describe_error(dmasr: u32) -> Option<&'static str> {
    if dmasr & status::DMA_INT_ERR != 0 {
        Some("DMA internal error")
    } else if dmasr & status::DMA_SLV_ERR != 0 {
        Some("DMA slave error")
    } else if dmasr & status::DMA_DEC_ERR != 0 {
        Some("DMA decode error")
    } else {
        None
    }
}
