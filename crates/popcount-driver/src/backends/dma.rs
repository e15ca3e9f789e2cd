//! DMA backend: chunked AXI DMA transfers
//!
//! Words are copied into the transfer buffer one chunk at a time and streamed
//! to the popcount IP with a blocking MM2S transfer. A chunk is bounded by the
//! configured limit, the buffer capacity, and the 14-bit LENGTH register
//! (4095 words). The cursor advances by the words actually sent, so a short
//! final chunk is neither skipped nor repeated.

use super::{read_counter, reset_counter};
use crate::backend::{BackendType, PopcountBackend};
use crate::config::DeviceConfig;
use crate::dma::{AxiDma, PollConfig};
use crate::error::{PopcountError, Result};
use crate::mmio::{RegisterIo, SubRegion, UioRegion};
use crate::udmabuf::{TransferBuffer, UdmaBuffer};
use popcount_chip::dma;
use std::fmt::Debug;

/// DMA streaming backend
#[derive(Debug)]
pub struct DmaBackend<R = UioRegion, B = UdmaBuffer> {
    regs: R,
    buffer: B,
    dma_offset: usize,
    chunk_words: usize,
    poll: PollConfig,
    transfers: u64,
}

impl DmaBackend<UioRegion, UdmaBuffer> {
    /// Map the UIO window and the u-dma-buf buffer described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, either device cannot be
    /// mapped, or the DMA core does not come out of reset.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Initializing DMA backend on {} with {}",
            config.uio_path.display(),
            config.udmabuf_name
        );

        let regs = UioRegion::open(&config.uio_path, config.uio_map_size)?;
        let buffer = UdmaBuffer::open(
            &config.dev_dir,
            &config.sysfs_root,
            &config.udmabuf_name,
            config.max_transfer_words * 4,
        )?;
        tracing::debug!(
            "DMA source buffer {} at {:#x}",
            buffer.path().display(),
            buffer.phys_addr()
        );

        Self::new(regs, buffer, config)
    }
}

impl<R: RegisterIo, B: TransferBuffer> DmaBackend<R, B> {
    /// Drive an already-mapped register window and transfer buffer
    ///
    /// Resets the DMA core before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the buffer cannot hold a
    /// single word, or the DMA reset times out.
    pub fn new(regs: R, buffer: B, config: &DeviceConfig) -> Result<Self> {
        config.validate()?;

        let chunk_words = config
            .max_transfer_words
            .min(buffer.capacity() / 4)
            .min(dma::MAX_TRANSFER_WORDS);
        if chunk_words == 0 {
            return Err(PopcountError::invalid_config(format!(
                "Transfer buffer of {} bytes cannot hold a word",
                buffer.capacity()
            )));
        }

        let mut backend = Self {
            regs,
            buffer,
            dma_offset: config.dma_offset,
            chunk_words,
            poll: config.poll,
            transfers: 0,
        };
        backend.engine().reset()?;

        tracing::info!("DMA backend ready: {chunk_words} words per transfer");
        Ok(backend)
    }

    /// Words sent per full transfer
    pub const fn chunk_words(&self) -> usize {
        self.chunk_words
    }

    /// Transfers issued since open
    pub const fn transfers(&self) -> u64 {
        self.transfers
    }

    fn engine(&mut self) -> AxiDma<SubRegion<&mut R>> {
        AxiDma::new(
            SubRegion::new(&mut self.regs, self.dma_offset, dma::MM2S_BLOCK_SIZE),
            self.poll,
        )
    }
}

impl<R, B> PopcountBackend for DmaBackend<R, B>
where
    R: RegisterIo + Debug + Send,
    B: TransferBuffer + Debug + Send,
{
    fn reset(&mut self) -> Result<()> {
        reset_counter(&mut self.regs)
    }

    fn stream(&mut self, words: &[u32]) -> Result<()> {
        tracing::debug!(
            "Streaming {} words via DMA in chunks of {}",
            words.len(),
            self.chunk_words
        );

        for chunk in words.chunks(self.chunk_words) {
            let bytes: &[u8] = bytemuck::cast_slice(chunk);
            self.buffer.write(0, bytes)?;
            let paddr = self.buffer.phys_addr();
            self.engine().transfer(paddr, bytes.len())?;
            self.transfers += 1;
        }
        Ok(())
    }

    fn count(&self) -> Result<u32> {
        read_counter(&self.regs)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Dma
    }

    fn is_ready(&self) -> bool {
        self.regs
            .read_u32(self.dma_offset + dma::MM2S_DMASR)
            .is_ok_and(|sr| sr & dma::status::ERROR_MASK == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedFabric;

    fn backend_with(
        fabric: &SimulatedFabric,
        buffer_bytes: usize,
        max_words: usize,
    ) -> DmaBackend<SimulatedFabric, crate::sim::SimBuffer> {
        let config = DeviceConfig::default().with_max_transfer_words(max_words);
        DmaBackend::new(fabric.clone(), fabric.dma_buffer(buffer_bytes), &config).unwrap()
    }

    #[test]
    fn chunk_size_is_smallest_limit() {
        let fabric = SimulatedFabric::new();
        assert_eq!(backend_with(&fabric, 1 << 20, 4095).chunk_words(), 4095);
        assert_eq!(backend_with(&fabric, 1 << 20, 100).chunk_words(), 100);
        assert_eq!(backend_with(&fabric, 64, 4095).chunk_words(), 16);
    }

    #[test]
    fn short_final_chunk_is_sent_exactly_once() {
        let fabric = SimulatedFabric::new();
        let mut backend = backend_with(&fabric, 1 << 16, 4);
        let words: Vec<u32> = (1..=10).collect();

        backend.reset().unwrap();
        backend.stream(&words).unwrap();

        assert_eq!(fabric.transfers(), vec![16, 16, 8]);
        assert_eq!(backend.transfers(), 3);
        let expected: u32 = words.iter().map(|w| w.count_ones()).sum();
        assert_eq!(backend.count().unwrap(), expected);
    }

    #[test]
    fn large_input_spans_many_transfers() {
        let fabric = SimulatedFabric::new();
        let mut backend = backend_with(&fabric, 1 << 16, 4095);
        let words = vec![0xFFFF_FFFFu32; 10_000];

        backend.reset().unwrap();
        backend.stream(&words).unwrap();

        assert_eq!(fabric.transfers(), vec![16380, 16380, 1810 * 4]);
        assert_eq!(backend.count().unwrap(), 320_000);
    }

    #[test]
    fn empty_input_issues_no_transfer() {
        let fabric = SimulatedFabric::new();
        let mut backend = backend_with(&fabric, 1 << 16, 4095);
        backend.reset().unwrap();
        backend.stream(&[]).unwrap();
        assert!(fabric.transfers().is_empty());
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn buffer_too_small_is_rejected() {
        let fabric = SimulatedFabric::new();
        let err = DmaBackend::new(fabric.clone(), fabric.dma_buffer(3), &DeviceConfig::default())
            .unwrap_err();
        assert!(matches!(err, PopcountError::InvalidConfig { .. }));
    }

    #[test]
    fn dma_errors_propagate_and_clear_readiness() {
        let fabric = SimulatedFabric::new();
        let mut backend = backend_with(&fabric, 1 << 16, 4095);
        assert!(backend.is_ready());

        fabric.inject_dma_error(dma::status::DMA_SLV_ERR);
        let err = backend.stream(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, PopcountError::HardwareError { .. }));
        assert!(!backend.is_ready());
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_dma_backend_on_hardware() {
        let mut backend = DmaBackend::open(&DeviceConfig::default()).expect("DMA backend");
        backend.reset().unwrap();
        backend.stream(&vec![0x0000_00FF; 5000]).unwrap();
        assert_eq!(backend.count().unwrap(), 40_000);
    }
}
