//! `popcount`: command-line interface for the FPGA popcount peripheral.
//!
//! ```text
//! USAGE:
//!   popcount count <file> [--mode mmio]    Count the ones in a file
//!   popcount int <n> [--mode mmio]         Count the ones in one 32-bit value
//!   popcount devices                       List UIO and u-dma-buf devices
//!   popcount program <bitstream>           Load a bitstream (root)
//!   popcount state                         Show the FPGA manager state
//! ```
//!
//! Device paths come from `POPCOUNT_*` environment variables; see
//! `DeviceConfig::from_env`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use popcount_driver::{layout, BackendType, DeviceConfig, HardwarePopcount, Overlay, OverlayConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "popcount", about = "FPGA popcount peripheral CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Count the set bits in a file.
    Count {
        /// Input file.
        file: PathBuf,
        /// Transport: mmio, dma or software.
        #[arg(long, default_value = "mmio")]
        mode: BackendType,
    },
    /// Count the set bits in one 32-bit value.
    Int {
        /// Decimal (may be negative) or 0x-prefixed hex.
        #[arg(allow_negative_numbers = true, value_parser = parse_word)]
        value: u32,
        /// Transport: mmio, dma or software.
        #[arg(long, default_value = "mmio")]
        mode: BackendType,
    },
    /// List UIO devices and u-dma-buf buffers.
    Devices,
    /// Program a bitstream through the FPGA manager (requires root).
    Program {
        /// Bitstream file.
        #[arg(default_value = layout::DEFAULT_BITSTREAM)]
        bitstream: PathBuf,
        /// FPGA manager instance.
        #[arg(long, default_value = layout::DEFAULT_FPGA_MANAGER)]
        manager: String,
    },
    /// Print the FPGA manager state.
    State {
        /// FPGA manager instance.
        #[arg(long, default_value = layout::DEFAULT_FPGA_MANAGER)]
        manager: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = DeviceConfig::from_env()?;

    match cli.command {
        Cmd::Count { file, mode } => cmd_count(&config, mode, &file)?,
        Cmd::Int { value, mode } => cmd_int(&config, mode, value)?,
        Cmd::Devices => cmd_devices(&config)?,
        Cmd::Program { bitstream, manager } => cmd_program(&config, bitstream, &manager)?,
        Cmd::State { manager } => cmd_state(&config, &manager)?,
    }

    Ok(())
}

/// Accept `-1`, `4294967295` or `0xFFFFFFFF` as the same word
fn parse_word(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else if s.starts_with('-') {
        s.parse::<i32>()
            .map(|v| u32::from_ne_bytes(v.to_ne_bytes()))
            .map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    };
    parsed.map_err(|e| format!("{s:?} is not a 32-bit integer: {e}"))
}

fn cmd_count(config: &DeviceConfig, mode: BackendType, file: &Path) -> Result<()> {
    let mut pc = HardwarePopcount::open(mode, config)
        .with_context(|| format!("Cannot open popcount device in {mode} mode"))?;
    tracing::info!("Using {pc}");

    let ones = pc
        .count_file(file)
        .with_context(|| format!("Counting {} failed", file.display()))?;
    println!("Counted {ones} ones");
    Ok(())
}

fn cmd_int(config: &DeviceConfig, mode: BackendType, value: u32) -> Result<()> {
    let mut pc = HardwarePopcount::open(mode, config)
        .with_context(|| format!("Cannot open popcount device in {mode} mode"))?;
    let ones = pc.count_int(value)?;
    println!("Counted {ones} ones in {value:#010x}");
    Ok(())
}

fn cmd_devices(config: &DeviceConfig) -> Result<()> {
    let uio = popcount_driver::discover_uio(&config.sysfs_root)?;
    println!("UIO devices: {}", uio.len());
    for dev in &uio {
        let size = dev
            .map_size
            .map_or_else(|| "-".to_string(), |s| format!("{s:#x}"));
        println!("  [{}] {:<24} {}  map0 {}", dev.index, dev.name, dev.path.display(), size);
    }

    let bufs = popcount_driver::discover_udmabufs(&config.sysfs_root)?;
    println!();
    println!("u-dma-buf buffers: {}", bufs.len());
    for buf in &bufs {
        println!(
            "  {:<12} phys {:#010x}  {} bytes ({} words per transfer)",
            buf.name,
            buf.phys_addr,
            buf.size,
            (buf.size / 4).min(config.max_transfer_words)
        );
    }
    Ok(())
}

fn cmd_program(config: &DeviceConfig, bitstream: PathBuf, manager: &str) -> Result<()> {
    let overlay_config = OverlayConfig::new(bitstream)
        .with_manager(manager)
        .with_sysfs_root(config.sysfs_root.clone());

    println!(
        "Programming {} with {} ...",
        manager,
        overlay_config.bitstream.display()
    );
    let overlay = Overlay::program(&overlay_config)?;
    println!("Done. {} loaded, fabric operating.", overlay.firmware());
    Ok(())
}

fn cmd_state(config: &DeviceConfig, manager: &str) -> Result<()> {
    let state = Overlay::state(&config.sysfs_root, manager)?;
    println!("{manager}: {state}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_word_forms() {
        assert_eq!(parse_word("5").unwrap(), 5);
        assert_eq!(parse_word("-1").unwrap(), u32::MAX);
        assert_eq!(parse_word("0xF0").unwrap(), 0xF0);
        assert_eq!(parse_word("4294967295").unwrap(), u32::MAX);
        assert!(parse_word("4294967296").is_err());
        assert!(parse_word("ten").is_err());
    }

    #[test]
    fn cli_parses_modes() {
        let cli = Cli::try_parse_from(["popcount", "int", "-3", "--mode", "sw"]).unwrap();
        match cli.command {
            Cmd::Int { value, mode } => {
                assert_eq!(value, 0xFFFF_FFFD);
                assert_eq!(mode, BackendType::Software);
            }
            _ => panic!("expected int"),
        }
        assert!(Cli::try_parse_from(["popcount", "count", "f.bin", "--mode", "pio"]).is_err());
    }

    #[test]
    fn subcommands_default_to_mmio() {
        let cli = Cli::try_parse_from(["popcount", "count", "f.bin"]).unwrap();
        assert!(matches!(cli.command, Cmd::Count { mode: BackendType::Mmio, .. }));

        let cli = Cli::try_parse_from(["popcount", "int", "7"]).unwrap();
        assert!(matches!(cli.command, Cmd::Int { mode: BackendType::Mmio, .. }));

        let cli = Cli::try_parse_from(["popcount", "count", "f.bin", "--mode", "dma"]).unwrap();
        assert!(matches!(cli.command, Cmd::Count { mode: BackendType::Dma, .. }));
    }
}
