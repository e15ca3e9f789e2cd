//! In-memory model of the popcount block design
//!
//! [`SimulatedFabric`] answers register accesses the way the programmed FPGA
//! does: the popcount IP at offset 0 and an AXI DMA MM2S channel at
//! [`DMA_OFFSET`](popcount_chip::layout::DMA_OFFSET). DMA transfers read from
//! the memory behind a [`SimBuffer`] handed out by the same fabric, so the
//! backends can be exercised end to end without a board.
//!
//! Transfers complete immediately: `DMASR.Idle` is set as soon as LENGTH is
//! written.
//!
//! The DMA block sits at the stock offset unless the fabric is built with
//! [`SimulatedFabric::for_config`] or [`SimulatedFabric::with_dma_offset`].

use crate::backend::{BackendType, PopcountBackend};
use crate::backends::{DmaBackend, MmioBackend, SoftwareBackend};
use crate::config::DeviceConfig;
use crate::error::{PopcountError, Result};
use crate::mmio::RegisterIo;
use crate::udmabuf::{check_capacity, TransferBuffer};
use popcount_chip::{dma, layout, regs};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Physical address reported by simulated transfer buffers
pub const SIM_PHYS_BASE: u64 = 0x3E00_0000;

#[derive(Debug, Default)]
struct FabricState {
    dma_base: usize,
    count: u32,
    count_writes: u64,
    dmacr: u32,
    errors: u32,
    irq: u32,
    sa: u64,
    memory: Vec<u8>,
    transfers: Vec<usize>,
    scratch: BTreeMap<usize, u32>,
}

impl FabricState {
    fn dma_register(&self, offset: usize) -> Option<usize> {
        offset
            .checked_sub(self.dma_base)
            .filter(|&rel| rel < dma::MM2S_BLOCK_SIZE)
    }

    fn dmasr(&self) -> u32 {
        let run_state = if self.dmacr & dma::control::RS == 0 {
            dma::status::HALTED
        } else {
            dma::status::IDLE
        };
        run_state | self.errors | self.irq
    }

    fn fail(&mut self, bits: u32) {
        self.errors |= bits;
        self.irq |= dma::status::ERR_IRQ;
    }

    fn run_transfer(&mut self, len: usize) {
        if len == 0 {
            self.fail(dma::status::DMA_INT_ERR);
            return;
        }
        let Some(start) = self
            .sa
            .checked_sub(SIM_PHYS_BASE)
            .and_then(|off| usize::try_from(off).ok())
        else {
            self.fail(dma::status::DMA_DEC_ERR);
            return;
        };
        let Some(data) = start
            .checked_add(len)
            .and_then(|end| self.memory.get(start..end))
        else {
            self.fail(dma::status::DMA_DEC_ERR);
            return;
        };

        // The IP consumes whole beats; a partial trailing beat is zero-padded.
        let ones = data
            .chunks(4)
            .map(|beat| {
                let mut word = [0u8; 4];
                word[..beat.len()].copy_from_slice(beat);
                u32::from_le_bytes(word).count_ones()
            })
            .fold(0u32, u32::wrapping_add);
        self.count = self.count.wrapping_add(ones);
        self.transfers.push(len);
        self.irq |= dma::status::IOC_IRQ;
    }
}

/// Simulated UIO window: popcount IP plus AXI DMA
///
/// Clones share state, so a test can hand one clone to a backend and inspect
/// the fabric through another.
#[derive(Debug, Clone)]
pub struct SimulatedFabric {
    state: Arc<Mutex<FabricState>>,
}

impl Default for SimulatedFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFabric {
    /// Create a fabric with a cleared accumulator and a halted DMA channel
    pub fn new() -> Self {
        Self::with_dma_offset(layout::DMA_OFFSET)
    }

    /// Create a fabric whose DMA block sits at `dma_offset`
    pub fn with_dma_offset(dma_offset: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FabricState {
                dma_base: dma_offset,
                ..FabricState::default()
            })),
        }
    }

    /// Create a fabric laid out the way `config` expects the hardware
    pub fn for_config(config: &DeviceConfig) -> Self {
        Self::with_dma_offset(config.dma_offset)
    }

    /// Open a `mode` backend on this fabric
    ///
    /// The simulated counterpart of [`select_backend`](crate::select_backend):
    /// the DMA backend gets a fresh buffer of `max_transfer_words` words, and
    /// software mode ignores the fabric.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the DMA reset fails.
    pub fn backend(
        &self,
        mode: BackendType,
        config: &DeviceConfig,
    ) -> Result<Box<dyn PopcountBackend>> {
        if mode.is_hardware() {
            config.validate()?;
        }
        let backend: Box<dyn PopcountBackend> = match mode {
            BackendType::Mmio => Box::new(MmioBackend::new(self.clone())),
            BackendType::Dma => {
                let buffer = self.dma_buffer(config.max_transfer_words * 4);
                Box::new(DmaBackend::new(self.clone(), buffer, config)?)
            }
            BackendType::Software => Box::new(SoftwareBackend::new()),
        };
        Ok(backend)
    }

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `capacity` bytes of simulated DMA memory
    ///
    /// Replaces any buffer handed out earlier.
    pub fn dma_buffer(&self, capacity: usize) -> SimBuffer {
        self.lock().memory = vec![0; capacity];
        SimBuffer {
            state: Arc::clone(&self.state),
            capacity,
        }
    }

    /// Number of writes to the popcount `COUNT` register
    pub fn count_writes(&self) -> u64 {
        self.lock().count_writes
    }

    /// Byte length of every completed DMA transfer, in order
    pub fn transfers(&self) -> Vec<usize> {
        self.lock().transfers.clone()
    }

    /// Latch DMASR error bits until the next DMA reset
    pub fn inject_dma_error(&self, bits: u32) {
        self.lock().fail(bits & dma::status::ERROR_MASK);
    }

    fn check_offset(offset: usize, op: &str) -> Result<()> {
        if offset % 4 != 0 || offset >= layout::UIO_MAP_SIZE {
            return Err(PopcountError::transfer_failed(format!(
                "Simulated {op} outside register map: offset={offset:#x}"
            )));
        }
        Ok(())
    }
}

impl RegisterIo for SimulatedFabric {
    #[allow(clippy::cast_possible_truncation)]
    fn read_u32(&self, offset: usize) -> Result<u32> {
        Self::check_offset(offset, "read")?;
        let state = self.lock();
        let value = match (offset, state.dma_register(offset)) {
            (regs::COUNT, _) => state.count,
            (_, Some(dma::MM2S_DMACR)) => state.dmacr,
            (_, Some(dma::MM2S_DMASR)) => state.dmasr(),
            (_, Some(dma::MM2S_SA)) => state.sa as u32,
            (_, Some(dma::MM2S_SA_MSB)) => (state.sa >> 32) as u32,
            _ => state.scratch.get(&offset).copied().unwrap_or(0),
        };
        Ok(value)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        Self::check_offset(offset, "write")?;
        let mut state = self.lock();
        let dma_reg = state.dma_register(offset);
        match (offset, dma_reg) {
            (regs::RESET, _) => {
                if value & regs::RESET_ASSERT != 0 {
                    state.count = 0;
                }
            }
            (regs::COUNT, _) => {
                state.count = state.count.wrapping_add(value.count_ones());
                state.count_writes += 1;
            }
            (_, Some(dma::MM2S_DMACR)) => {
                if value & dma::control::RESET != 0 {
                    state.dmacr = 0;
                    state.errors = 0;
                    state.irq = 0;
                } else {
                    state.dmacr = value;
                }
            }
            (_, Some(dma::MM2S_DMASR)) => {
                state.irq &= !(value & (dma::status::IOC_IRQ | dma::status::ERR_IRQ));
            }
            (_, Some(dma::MM2S_SA)) => {
                state.sa = (state.sa & !0xFFFF_FFFF) | u64::from(value);
            }
            (_, Some(dma::MM2S_SA_MSB)) => {
                state.sa = (state.sa & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            (_, Some(dma::MM2S_LENGTH)) => {
                let len = (value as usize) & dma::MAX_TRANSFER_BYTES;
                state.run_transfer(len);
            }
            _ => {
                state.scratch.insert(offset, value);
            }
        }
        Ok(())
    }
}

/// Deterministic xorshift32 test payload of `len` words
///
/// A zero seed is replaced by 1, since xorshift never leaves zero.
pub fn xorshift_words(len: usize, seed: u32) -> Vec<u32> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        })
        .collect()
}

/// Transfer buffer backed by [`SimulatedFabric`] memory
#[derive(Debug)]
pub struct SimBuffer {
    state: Arc<Mutex<FabricState>>,
    capacity: usize,
}

impl TransferBuffer for SimBuffer {
    fn phys_addr(&self) -> u64 {
        SIM_PHYS_BASE
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_capacity(offset, data.len(), self.capacity)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let dest = state
            .memory
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| PopcountError::transfer_failed("Simulated DMA memory was reallocated"))?;
        dest.copy_from_slice(data);
        Ok(())
    }
}
