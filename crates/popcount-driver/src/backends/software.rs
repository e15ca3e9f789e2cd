// SPDX-License-Identifier: AGPL-3.0-only

//! Software reference backend
//!
//! Counts bits on the CPU with the same accumulator semantics as the IP: a
//! 32-bit total that wraps, cleared only by reset. This enables:
//!
//! 1. **CI without hardware**: the dispatch layer, the CLI and the file
//!    handling all run without a board.
//!
//! 2. **Ground truth for hardware validation**: `validate_parity` compares
//!    the MMIO and DMA totals against this backend for the same payloads.

use crate::backend::{BackendType, PopcountBackend};
use crate::error::Result;
use tracing::debug;

/// CPU popcount with hardware accumulator semantics
#[derive(Debug, Default, Clone)]
pub struct SoftwareBackend {
    total: u32,
    words_streamed: u64,
}

impl SoftwareBackend {
    /// Create a backend with a cleared accumulator
    pub const fn new() -> Self {
        Self {
            total: 0,
            words_streamed: 0,
        }
    }

    /// Words consumed since the last reset
    pub const fn words_streamed(&self) -> u64 {
        self.words_streamed
    }
}

impl PopcountBackend for SoftwareBackend {
    fn reset(&mut self) -> Result<()> {
        self.total = 0;
        self.words_streamed = 0;
        Ok(())
    }

    fn stream(&mut self, words: &[u32]) -> Result<()> {
        debug!("SoftwareBackend: counting {} words", words.len());
        self.total = words
            .iter()
            .fold(self.total, |acc, w| acc.wrapping_add(w.count_ones()));
        self.words_streamed += words.len() as u64;
        Ok(())
    }

    fn count(&self) -> Result<u32> {
        Ok(self.total)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn is_ready(&self) -> bool {
        true
    }
}
