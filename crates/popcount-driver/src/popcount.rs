//! High-level popcount API
//!
//! [`HardwarePopcount`] is what applications use: pick a mode, hand it
//! integers, arrays, byte buffers or files, and get the number of set bits
//! back. Every counting call resets the accumulator first, so calls never
//! see each other's totals.
//!
//! Byte input is turned into words the way the bitstream's user-space
//! programs always fed it: whole 4-byte groups as little-endian words, and
//! the 0-3 bytes left over at the end of the input as one zero-extended word
//! each.

use crate::backend::{select_backend, BackendType, PopcountBackend};
use crate::config::DeviceConfig;
use crate::error::{PopcountError, Result};
use crate::overlay::Overlay;
use crate::sim::SimulatedFabric;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, info};

/// Bytes read per block by [`HardwarePopcount::count_reader`]
const READ_BLOCK_BYTES: usize = 64 * 1024;

/// Popcount peripheral front end
#[derive(Debug)]
pub struct HardwarePopcount {
    backend: Box<dyn PopcountBackend>,
    mode: BackendType,
    overlay: Option<Overlay>,
}

impl HardwarePopcount {
    /// Open the peripheral in `mode`
    ///
    /// Hardware modes program `config.overlay` first when one is set.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The overlay cannot be programmed (`ProgramFailed`)
    /// - The configuration is invalid or a device cannot be mapped
    /// - The backend is not ready once opened (`InvalidState`)
    pub fn open(mode: BackendType, config: &DeviceConfig) -> Result<Self> {
        let overlay = match &config.overlay {
            Some(overlay_config) if mode.is_hardware() => {
                let overlay = Overlay::program(overlay_config).map_err(|e| {
                    PopcountError::program_failed(&overlay_config.manager, format!("{e:#}"))
                })?;
                Some(overlay)
            }
            _ => None,
        };

        let pc = Self::from_ready_backend(select_backend(mode, config)?, overlay)?;
        info!("HardwarePopcount open in {mode} mode");
        Ok(pc)
    }

    /// Open `mode` on a fresh [`SimulatedFabric`] laid out per `config`
    ///
    /// No device node or overlay is touched.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the backend is not
    /// ready once opened.
    pub fn open_simulated(mode: BackendType, config: &DeviceConfig) -> Result<Self> {
        let fabric = SimulatedFabric::for_config(config);
        let pc = Self::from_ready_backend(fabric.backend(mode, config)?, None)?;
        info!("HardwarePopcount open in {mode} mode (simulated fabric)");
        Ok(pc)
    }

    /// Accept a freshly opened backend only if it reports ready
    fn from_ready_backend(
        backend: Box<dyn PopcountBackend>,
        overlay: Option<Overlay>,
    ) -> Result<Self> {
        let mode = backend.backend_type();
        if !backend.is_ready() {
            return Err(PopcountError::invalid_state(format!(
                "{mode} backend not ready after open"
            )));
        }
        Ok(Self {
            backend,
            mode,
            overlay,
        })
    }

    /// Wrap an already-open backend
    pub fn with_backend(backend: Box<dyn PopcountBackend>) -> Self {
        let mode = backend.backend_type();
        Self {
            backend,
            mode,
            overlay: None,
        }
    }

    /// Driver name
    pub const fn name(&self) -> &'static str {
        "HardwarePopcount"
    }

    /// Transport in use
    pub const fn mode(&self) -> BackendType {
        self.mode
    }

    /// Overlay programmed by [`open`](Self::open), if any
    pub const fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    /// Clear the accumulator
    ///
    /// # Errors
    ///
    /// Returns error if the reset register cannot be written.
    pub fn reset(&mut self) -> Result<()> {
        self.backend.reset()
    }

    /// Read the accumulator without resetting it
    ///
    /// # Errors
    ///
    /// Returns error if the count register cannot be read.
    pub fn count(&self) -> Result<u32> {
        self.backend.count()
    }

    /// Count the set bits of one 32-bit value
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub fn count_int(&mut self, value: u32) -> Result<u32> {
        self.count_array(&[value])
    }

    /// Count the set bits of a signed value (two's complement bits)
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub fn count_int_signed(&mut self, value: i32) -> Result<u32> {
        self.count_array(&[u32::from_ne_bytes(value.to_ne_bytes())])
    }

    /// Count the set bits across `words`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub fn count_array(&mut self, words: &[u32]) -> Result<u32> {
        debug!("{}: counting {} words", self.mode, words.len());
        self.backend.reset()?;
        self.backend.stream(words)?;
        self.backend.count()
    }

    /// Count the set bits across signed `values`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub fn count_array_signed(&mut self, values: &[i32]) -> Result<u32> {
        self.count_array(bytemuck::cast_slice(values))
    }

    /// Count the set bits of a byte buffer
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub fn count_bytes(&mut self, bytes: &[u8]) -> Result<u32> {
        self.count_array(&words_from_bytes(bytes))
    }

    /// Count the set bits of everything `reader` yields
    ///
    /// Input is streamed in blocks; partial words carry over between reads,
    /// so the result matches [`count_bytes`](Self::count_bytes) on the whole
    /// input.
    ///
    /// # Errors
    ///
    /// Returns error if reading fails or the backend fails.
    pub fn count_reader(&mut self, mut reader: impl Read) -> Result<u32> {
        self.backend.reset()?;

        let mut block = vec![0u8; READ_BLOCK_BYTES];
        let mut carry = 0;
        let mut total_bytes = 0u64;
        loop {
            let n = match reader.read(&mut block[carry..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            total_bytes += n as u64;

            let filled = carry + n;
            let whole = filled - filled % 4;
            if whole > 0 {
                self.backend.stream(&words_from_bytes(&block[..whole]))?;
            }
            block.copy_within(whole..filled, 0);
            carry = filled - whole;
        }
        if carry > 0 {
            self.backend.stream(&words_from_bytes(&block[..carry]))?;
        }

        debug!("{}: streamed {total_bytes} bytes", self.mode);
        self.backend.count()
    }

    /// Count the set bits of a file
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the file does not exist, or any error from
    /// [`count_reader`](Self::count_reader).
    pub fn count_file(&mut self, path: impl AsRef<Path>) -> Result<u32> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PopcountError::device_not_found(path),
            _ => e.into(),
        })?;
        info!("Counting {}", path.display());
        self.count_reader(file)
    }
}

impl fmt::Display for HardwarePopcount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.mode)
    }
}

/// Turn a byte stream into counter words
///
/// Whole 4-byte groups become little-endian words. Each trailing byte becomes
/// its own zero-extended word.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    let groups = bytes.chunks_exact(4);
    let tail = groups.remainder();
    groups
        .map(|g| u32::from_le_bytes([g[0], g[1], g[2], g[3]]))
        .chain(tail.iter().map(|&b| u32::from(b)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DmaBackend, MmioBackend, SoftwareBackend};
    use crate::overlay::OverlayConfig;
    use crate::sim::SimulatedFabric;
    use std::io::Cursor;

    fn software() -> HardwarePopcount {
        HardwarePopcount::with_backend(Box::new(SoftwareBackend::new()))
    }

    /// Hands out at most `step` bytes per read
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn words_from_bytes_splits_tail() {
        assert_eq!(
            words_from_bytes(&[0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB]),
            vec![0x0403_0201, 0xAA, 0xBB]
        );
        assert!(words_from_bytes(&[]).is_empty());
    }

    #[test]
    fn count_int_examples() {
        let mut pc = software();
        assert_eq!(pc.count_int(0).unwrap(), 0);
        assert_eq!(pc.count_int(0xFFFF_FFFF).unwrap(), 32);
        assert_eq!(pc.count_int(0b1011).unwrap(), 3);
    }

    #[test]
    fn signed_values_count_their_bit_pattern() {
        let mut pc = software();
        assert_eq!(pc.count_int_signed(-1).unwrap(), 32);
        assert_eq!(pc.count_int_signed(i32::MIN).unwrap(), 1);
        assert_eq!(pc.count_array_signed(&[-1, 1, 0]).unwrap(), 33);
    }

    #[test]
    fn each_call_starts_from_zero() {
        let mut pc = software();
        assert_eq!(pc.count_array(&[0xFF, 0xFF]).unwrap(), 16);
        assert_eq!(pc.count_array(&[0x1]).unwrap(), 1);
        assert_eq!(pc.count_array(&[]).unwrap(), 0);
    }

    #[test]
    fn reader_matches_bytes_across_odd_reads() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_007).collect();
        let expected = software().count_bytes(&data).unwrap();

        let mut pc = software();
        let got = pc.count_reader(Trickle { data: &data, step: 7 }).unwrap();
        assert_eq!(got, expected);
        assert_eq!(got, data.iter().map(|b| b.count_ones()).sum::<u32>());
    }

    #[test]
    fn reader_handles_blocks_larger_than_buffer() {
        let data = vec![0x0Fu8; READ_BLOCK_BYTES * 2 + 3];
        let mut pc = software();
        assert_eq!(pc.count_reader(Cursor::new(&data)).unwrap(), 4 * data.len() as u32);
    }

    #[test]
    fn count_file_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        std::fs::write(&path, [0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap();

        let mut pc = software();
        assert_eq!(pc.count_file(&path).unwrap(), 33);
    }

    #[test]
    fn count_file_missing_is_device_not_found() {
        let mut pc = software();
        let err = pc.count_file("/nonexistent/input.bin").unwrap_err();
        assert!(matches!(err, PopcountError::DeviceNotFound { .. }));
    }

    #[test]
    fn transports_agree_on_same_input() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let expected = software().count_bytes(&data).unwrap();

        let fabric = SimulatedFabric::new();
        let mut mmio = HardwarePopcount::with_backend(Box::new(MmioBackend::new(fabric.clone())));
        assert_eq!(mmio.mode(), BackendType::Mmio);
        assert_eq!(mmio.count_bytes(&data).unwrap(), expected);

        let dma = DmaBackend::new(
            fabric.clone(),
            fabric.dma_buffer(16 * 1024),
            &DeviceConfig::default(),
        )
        .unwrap();
        let mut dma = HardwarePopcount::with_backend(Box::new(dma));
        assert_eq!(dma.count_bytes(&data).unwrap(), expected);
    }

    #[test]
    fn backend_not_ready_after_open_is_invalid_state() {
        let fabric = SimulatedFabric::new();
        let dma = DmaBackend::new(
            fabric.clone(),
            fabric.dma_buffer(16 * 1024),
            &DeviceConfig::default(),
        )
        .unwrap();
        fabric.inject_dma_error(popcount_chip::dma::status::DMA_SLV_ERR);

        let err = HardwarePopcount::from_ready_backend(Box::new(dma), None).unwrap_err();
        assert!(matches!(err, PopcountError::InvalidState { .. }));
    }

    #[test]
    fn ready_backend_is_accepted() {
        let fabric = SimulatedFabric::new();
        let pc = HardwarePopcount::from_ready_backend(Box::new(MmioBackend::new(fabric)), None)
            .unwrap();
        assert_eq!(pc.mode(), BackendType::Mmio);
    }

    #[test]
    fn open_simulated_counts_in_every_mode() {
        let config = DeviceConfig::default().with_max_transfer_words(16);
        for mode in BackendType::ALL {
            let mut pc = HardwarePopcount::open_simulated(mode, &config).unwrap();
            assert_eq!(pc.mode(), mode);
            assert_eq!(pc.count_array(&[u32::MAX; 40]).unwrap(), 40 * 32, "{mode}");
        }
    }

    #[test]
    fn open_simulated_rejects_invalid_config() {
        let config = DeviceConfig::default().with_max_transfer_words(0);
        let err = HardwarePopcount::open_simulated(BackendType::Dma, &config).unwrap_err();
        assert!(matches!(err, PopcountError::InvalidConfig { .. }));
    }

    #[test]
    fn display_names_mode() {
        let pc = software();
        assert_eq!(pc.name(), "HardwarePopcount");
        assert_eq!(pc.to_string(), "HardwarePopcount (software)");
    }

    #[test]
    fn software_mode_skips_overlay() {
        let config = DeviceConfig::default().with_overlay(OverlayConfig::new("/nonexistent.bit"));
        let pc = HardwarePopcount::open(BackendType::Software, &config).unwrap();
        assert!(pc.overlay().is_none());
    }

    #[test]
    fn overlay_failure_is_program_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig::default().with_overlay(
            OverlayConfig::new("/nonexistent.bit").with_sysfs_root(dir.path()),
        );
        let err = HardwarePopcount::open(BackendType::Mmio, &config).unwrap_err();
        assert!(matches!(err, PopcountError::ProgramFailed { ref manager, .. } if manager == "fpga0"));
    }
}
