//! validate_parity: hardware transports vs the software reference.
//!
//! Counts a set of payloads chosen around the DMA transfer boundary (4095
//! words) through MMIO, DMA and software, and fails on any mismatch.
//!
//! Usage:
//!   cargo run --bin validate_parity            # hardware + software
//!   cargo run --bin validate_parity -- --sw    # software only (CI)
//!   cargo run --bin validate_parity -- --sim   # hardware paths on the simulated fabric

use anyhow::{bail, Result};
use popcount_driver::sim::xorshift_words;
use popcount_driver::{BackendType, DeviceConfig, HardwarePopcount, SoftwareBackend};
use tracing_subscriber::EnvFilter;

/// Word counts exercised: empty, tiny, around one and two DMA transfers
const PAYLOAD_WORDS: [usize; 9] = [0, 1, 3, 4094, 4095, 4096, 8190, 8191, 100_000];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let sw_only = args.iter().any(|a| a == "--sw");
    let sim = args.iter().any(|a| a == "--sim");

    println!("Popcount parity validation");
    println!("==========================");

    let config = DeviceConfig::from_env()?;
    let mut reference = HardwarePopcount::with_backend(Box::new(SoftwareBackend::new()));

    let mut candidates = Vec::new();
    if !sw_only {
        for mode in [BackendType::Mmio, BackendType::Dma] {
            let opened = if sim {
                HardwarePopcount::open_simulated(mode, &config)
            } else {
                HardwarePopcount::open(mode, &config)
            };
            match opened {
                Ok(pc) => candidates.push(pc),
                Err(e) => println!("  {mode}: unavailable ({e})"),
            }
        }
    }
    if candidates.is_empty() {
        println!("  Checking software reference only");
    }
    println!();

    let mut failures = 0usize;
    for (i, &len) in PAYLOAD_WORDS.iter().enumerate() {
        let words = xorshift_words(len, 0x9E37_79B9 ^ (i as u32 + 1));
        let expected = reference.count_array(&words)?;
        let naive: u32 = words.iter().map(|w| w.count_ones()).sum();
        if expected != naive {
            println!("  [{len:>6} words] software {expected} != naive {naive}");
            failures += 1;
        }

        for pc in &mut candidates {
            let got = pc.count_array(&words)?;
            let verdict = if got == expected { "ok" } else { "MISMATCH" };
            println!("  [{len:>6} words] {:<9} {got:>10}  (expected {expected})  {verdict}", pc.mode());
            if got != expected {
                failures += 1;
            }
        }
        if candidates.is_empty() {
            println!("  [{len:>6} words] software  {expected:>10}");
        }
    }

    println!();
    if failures > 0 {
        bail!("{failures} parity failure(s)");
    }
    println!("All transports agree.");
    Ok(())
}
