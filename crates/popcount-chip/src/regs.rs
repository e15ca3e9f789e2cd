//! Popcount IP register map.
//!
//! The IP sits on an AXI4-Lite slave port (`axi_popcount_0/S_AXI_LITE`) at
//! the start of the UIO window. It exposes two 32-bit registers:
//!
//! ```text
//! 0x0: RESET  (W)   write 1 to clear the accumulator
//! 0x4: COUNT  (RW)  write: add popcount(word) to the accumulator
//!                   read:  current accumulator value
//! ```
//!
//! The accumulator keeps adding across writes until the next reset. Reading
//! `COUNT` has no side effects.

/// Reset register. Writing [`RESET_ASSERT`] clears the accumulator.
pub const RESET: usize = 0x0;

/// Operand / result register.
pub const COUNT: usize = 0x4;

/// Value written to [`RESET`] to clear the accumulator.
pub const RESET_ASSERT: u32 = 1;

/// Width of the accumulator in bits. Totals wrap at `2^32`.
pub const COUNT_WIDTH_BITS: u32 = 32;

/// Span of the popcount register block in bytes.
pub const BLOCK_SIZE: usize = 0x8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_word_aligned_and_distinct() {
        assert_ne!(RESET, COUNT);
        assert_eq!(RESET % 4, 0);
        assert_eq!(COUNT % 4, 0);
        assert!(COUNT + 4 <= BLOCK_SIZE);
    }
}
