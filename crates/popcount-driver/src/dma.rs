//! AXI DMA engine, MM2S channel in direct register (simple) mode
//!
//! Follows the "Programming Sequence - Direct Register Mode" of PG021:
//! start the channel, program the source address, write the length (which
//! starts the transfer), then poll `DMASR.Idle`. Interrupts are not used.

use crate::error::{PopcountError, Result};
use crate::mmio::RegisterIo;
use popcount_chip::dma::{self, control, status};

/// Parameters for polling a status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Give up after this many reads
    pub max_polls: u32,
    /// Yield the thread every this many reads
    pub yield_interval: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: 1_000_000,
            yield_interval: 1024,
        }
    }
}

/// MM2S half of an AXI DMA core
///
/// `R` is the DMA register block itself (offset 0 = `MM2S_DMACR`), usually a
/// [`SubRegion`](crate::mmio::SubRegion) of the UIO window.
#[derive(Debug)]
pub struct AxiDma<R> {
    regs: R,
    poll: PollConfig,
}

impl<R: RegisterIo> AxiDma<R> {
    /// Wrap a DMA register block
    pub const fn new(regs: R, poll: PollConfig) -> Self {
        Self { regs, poll }
    }

    /// Soft-reset the DMA core and wait for the reset bit to self-clear
    ///
    /// # Errors
    ///
    /// Returns error if the reset does not complete within the poll budget.
    pub fn reset(&mut self) -> Result<()> {
        tracing::debug!("Resetting AXI DMA");
        self.regs.write_u32(dma::MM2S_DMACR, control::RESET)?;
        self.poll_until("DMA reset", dma::MM2S_DMACR, |v| v & control::RESET == 0)?;
        Ok(())
    }

    /// Set Run/Stop and wait until the channel leaves the halted state
    ///
    /// Both interrupt enables are cleared: completion is always polled.
    ///
    /// # Errors
    ///
    /// Returns error if the channel stays halted.
    pub fn start(&mut self) -> Result<()> {
        let dmacr = self.regs.read_u32(dma::MM2S_DMACR)?;
        let dmacr = (dmacr | control::RS) & !(control::IOC_IRQ_EN | control::ERR_IRQ_EN);
        self.regs.write_u32(dma::MM2S_DMACR, dmacr)?;
        self.poll_until("DMA start", dma::MM2S_DMASR, |v| v & status::HALTED == 0)?;
        Ok(())
    }

    /// Stream `len` bytes starting at physical address `paddr` and block until
    /// the channel is idle again
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `len` is zero or larger than the LENGTH register can hold
    /// - The channel fails to start
    /// - DMASR reports an internal, slave or decode error
    /// - The transfer does not complete within the poll budget
    pub fn transfer(&mut self, paddr: u64, len: usize) -> Result<()> {
        if len == 0 {
            return Err(PopcountError::transfer_failed("Zero-length DMA transfer"));
        }
        if len > dma::MAX_TRANSFER_BYTES {
            return Err(PopcountError::transfer_failed(format!(
                "DMA transfer of {len} bytes exceeds LENGTH limit of {} bytes",
                dma::MAX_TRANSFER_BYTES
            )));
        }

        tracing::debug!("Starting DMA transfer: {len} bytes from {paddr:#x}");

        self.start()?;

        #[allow(clippy::cast_possible_truncation)]
        {
            self.regs.write_u32(dma::MM2S_SA, paddr as u32)?;
            if paddr >> 32 != 0 {
                self.regs.write_u32(dma::MM2S_SA_MSB, (paddr >> 32) as u32)?;
            }
            // Non-zero LENGTH write starts the transfer
            self.regs.write_u32(dma::MM2S_LENGTH, len as u32)?;
        }

        let polls = self.poll_until("DMA transfer", dma::MM2S_DMASR, |v| v & status::IDLE != 0)?;
        // IOC latches even with its interrupt disabled; write 1 to clear
        self.regs.write_u32(dma::MM2S_DMASR, status::IOC_IRQ)?;

        tracing::debug!("DMA transfer complete after {polls} polls");
        Ok(())
    }

    /// Release the register block
    pub fn into_inner(self) -> R {
        self.regs
    }

    /// Poll `reg` until `done` holds, returning the number of reads.
    /// DMASR error bits abort the wait.
    fn poll_until(&self, op: &str, reg: usize, done: impl Fn(u32) -> bool) -> Result<u32> {
        let PollConfig {
            max_polls,
            yield_interval,
        } = self.poll;

        for i in 0..max_polls {
            let val = self.regs.read_u32(reg)?;
            if reg == dma::MM2S_DMASR {
                if let Some(reason) = dma::describe_error(val) {
                    return Err(PopcountError::hardware_error(format!(
                        "{op}: {reason} (DMASR={val:#x})"
                    )));
                }
            }
            if done(val) {
                return Ok(i + 1);
            }
            if yield_interval != 0 && i % yield_interval == 0 {
                std::thread::yield_now();
            }
        }
        Err(PopcountError::timeout(op, max_polls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// DMA register file that behaves like an idle, well-behaved core
    #[derive(Debug, Default)]
    struct FakeDma {
        regs: BTreeMap<usize, u32>,
        writes: Vec<(usize, u32)>,
        stuck_halted: bool,
        error_bits: u32,
        never_idle: bool,
    }

    impl RegisterIo for FakeDma {
        fn read_u32(&self, offset: usize) -> Result<u32> {
            if offset == dma::MM2S_DMASR {
                let mut v = self.error_bits;
                let running = self.regs.get(&dma::MM2S_DMACR).copied().unwrap_or(0) & control::RS;
                if running == 0 || self.stuck_halted {
                    v |= status::HALTED;
                }
                if !self.never_idle {
                    v |= status::IDLE;
                }
                return Ok(v);
            }
            Ok(self.regs.get(&offset).copied().unwrap_or(0))
        }

        fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
            self.writes.push((offset, value));
            // Reset self-clears immediately
            let stored = if offset == dma::MM2S_DMACR { value & !control::RESET } else { value };
            self.regs.insert(offset, stored);
            Ok(())
        }
    }

    fn quick_poll() -> PollConfig {
        PollConfig {
            max_polls: 16,
            yield_interval: 4,
        }
    }

    #[test]
    fn transfer_follows_direct_register_sequence() {
        let mut engine = AxiDma::new(FakeDma::default(), quick_poll());
        engine.transfer(0x3E00_0000, 16).unwrap();

        let fake = engine.into_inner();
        assert_eq!(
            fake.writes,
            vec![
                (dma::MM2S_DMACR, control::RS),
                (dma::MM2S_SA, 0x3E00_0000),
                (dma::MM2S_LENGTH, 16),
                (dma::MM2S_DMASR, status::IOC_IRQ),
            ]
        );
    }

    #[test]
    fn start_clears_interrupt_enables() {
        let mut fake = FakeDma::default();
        fake.regs.insert(
            dma::MM2S_DMACR,
            control::IOC_IRQ_EN | control::ERR_IRQ_EN | (1 << 16),
        );
        let mut engine = AxiDma::new(fake, quick_poll());
        engine.start().unwrap();

        let fake = engine.into_inner();
        let (reg, dmacr) = fake.writes[0];
        assert_eq!(reg, dma::MM2S_DMACR);
        assert_eq!(dmacr & (control::IOC_IRQ_EN | control::ERR_IRQ_EN), 0);
        assert_eq!(dmacr, control::RS | (1 << 16));
    }

    #[test]
    fn high_addresses_program_sa_msb() {
        let mut engine = AxiDma::new(FakeDma::default(), quick_poll());
        engine.transfer(0x1_0000_2000, 4).unwrap();

        let fake = engine.into_inner();
        assert!(fake.writes.contains(&(dma::MM2S_SA, 0x2000)));
        assert!(fake.writes.contains(&(dma::MM2S_SA_MSB, 0x1)));
    }

    #[test]
    fn rejects_zero_and_oversized_lengths() {
        let mut engine = AxiDma::new(FakeDma::default(), quick_poll());
        assert!(engine.transfer(0x1000, 0).is_err());
        assert!(engine.transfer(0x1000, dma::MAX_TRANSFER_BYTES + 1).is_err());
        assert!(engine.into_inner().writes.is_empty());
    }

    #[test]
    fn halted_channel_times_out() {
        let fake = FakeDma {
            stuck_halted: true,
            ..FakeDma::default()
        };
        let mut engine = AxiDma::new(fake, quick_poll());
        let err = engine.transfer(0x1000, 4).unwrap_err();
        assert!(matches!(err, PopcountError::Timeout { polls: 16, .. }));
    }

    #[test]
    fn transfer_that_never_idles_times_out() {
        let fake = FakeDma {
            never_idle: true,
            ..FakeDma::default()
        };
        let mut engine = AxiDma::new(fake, quick_poll());
        let err = engine.transfer(0x1000, 4).unwrap_err();
        assert!(matches!(err, PopcountError::Timeout { .. }));
        assert!(err.to_string().starts_with("DMA transfer"));
    }

    #[test]
    fn error_bits_surface_as_hardware_errors() {
        let fake = FakeDma {
            error_bits: status::DMA_DEC_ERR,
            ..FakeDma::default()
        };
        let mut engine = AxiDma::new(fake, quick_poll());
        let err = engine.transfer(0x1000, 4).unwrap_err();
        assert!(matches!(err, PopcountError::HardwareError { .. }));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn reset_waits_for_self_clear() {
        let mut engine = AxiDma::new(FakeDma::default(), quick_poll());
        engine.reset().unwrap();
        let fake = engine.into_inner();
        assert_eq!(fake.writes, vec![(dma::MM2S_DMACR, control::RESET)]);
        assert_eq!(fake.regs[&dma::MM2S_DMACR] & control::RESET, 0);
    }
}
