//! Transport throughput benchmark: MMIO vs DMA vs software.
//!
//! Counts the same random payload through every transport that opens and
//! reports sustained MB/s. MMIO pays one AXI-Lite write per word, so it is
//! expected to trail DMA by a wide margin on large payloads.
//!
//! Usage:
//!   cargo run --bin bench_transport
//!   cargo run --bin bench_transport -- --size-kb 1024 --iterations 20
//!   cargo run --bin bench_transport -- --sim      # simulated fabric, no board

use anyhow::Result;
use popcount_driver::sim::xorshift_words;
use popcount_driver::{BackendType, DeviceConfig, HardwarePopcount};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_PAYLOAD_KB: usize = 256;
const DEFAULT_ITERATIONS: usize = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let payload_kb = parse_arg(&args, "--size-kb", DEFAULT_PAYLOAD_KB);
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);
    let sim = args.iter().any(|a| a == "--sim");

    println!("Popcount transport benchmark");
    println!("============================");
    println!("Payload     : {payload_kb} KB");
    println!("Iterations  : {iterations}");
    println!("Fabric      : {}", if sim { "simulated" } else { "hardware" });
    println!();

    let config = DeviceConfig::from_env()?;
    let words = xorshift_words(payload_kb * 256, 0x5EED_1234);
    let payload_bytes = (words.len() * 4) as f64;

    println!("Results");
    println!("-------");
    let mut reference = None;
    for mode in BackendType::ALL {
        let mut pc = match open(mode, &config, sim) {
            Ok(pc) => pc,
            Err(e) => {
                println!("  {mode:<9}: skipped ({e})");
                continue;
            }
        };

        let ones = pc.count_array(&words)?;
        let t0 = Instant::now();
        for _ in 0..iterations {
            pc.count_array(&words)?;
        }
        let elapsed = t0.elapsed();

        print_throughput(mode, elapsed, payload_bytes * iterations as f64, ones);
        match reference {
            None => reference = Some(ones),
            Some(expected) if expected != ones => {
                println!("    MISMATCH: {ones} vs {expected}");
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn open(mode: BackendType, config: &DeviceConfig, sim: bool) -> popcount_driver::Result<HardwarePopcount> {
    if sim {
        HardwarePopcount::open_simulated(mode, config)
    } else {
        HardwarePopcount::open(mode, config)
    }
}

fn print_throughput(mode: BackendType, elapsed: Duration, bytes: f64, ones: u32) {
    let secs = elapsed.as_secs_f64();
    let mb_s = (bytes / 1_048_576.0) / secs;
    println!("  {mode:<9}: {mb_s:>8.1} MB/s  ({ones} ones per pass)");
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
