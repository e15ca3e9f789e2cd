//! Transport parity tests
//!
//! The MMIO and DMA backends must report the same totals as the software
//! reference. Without a board they run against the simulated fabric.

use popcount_driver::sim::xorshift_words as payload;
use popcount_driver::{
    BackendType, DeviceConfig, HardwarePopcount, PopcountBackend, SimulatedFabric,
    SoftwareBackend,
};

fn simulated(mode: BackendType, fabric: &SimulatedFabric) -> Box<dyn PopcountBackend> {
    fabric
        .backend(mode, &DeviceConfig::default())
        .expect("simulated backend")
}

#[test]
fn test_simulated_transports_match_software() {
    for len in [0usize, 1, 4094, 4095, 4096, 10_000, 12_289] {
        let words = payload(len, 0x1234_5678 ^ len as u32);
        let mut reference = HardwarePopcount::with_backend(Box::new(SoftwareBackend::new()));
        let expected = reference.count_array(&words).unwrap();

        for mode in [BackendType::Mmio, BackendType::Dma] {
            let fabric = SimulatedFabric::new();
            let mut pc = HardwarePopcount::with_backend(simulated(mode, &fabric));
            assert_eq!(pc.count_array(&words).unwrap(), expected, "{mode} len={len}");
        }
    }
}

#[test]
fn test_dma_final_chunk_not_repeated() {
    // 4095 + 1 words: a fixed-stride cursor would resend or drop the tail
    let mut words = vec![0u32; 4095];
    words.push(0xFFFF_FFFF);

    let fabric = SimulatedFabric::new();
    let mut pc = HardwarePopcount::with_backend(simulated(BackendType::Dma, &fabric));
    assert_eq!(pc.count_array(&words).unwrap(), 32);
    assert_eq!(fabric.transfers(), vec![4095 * 4, 4]);
}

#[test]
fn test_file_counts_agree_across_transports() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    let mut bytes: Vec<u8> = bytemuck::cast_slice(&payload(20_000, 42)).to_vec();
    bytes.extend_from_slice(&[0xFF, 0x80, 0x01]);
    std::fs::write(&path, &bytes).unwrap();

    let expected: u32 = bytes.iter().map(|b| b.count_ones()).sum();
    for mode in BackendType::ALL {
        let fabric = SimulatedFabric::new();
        let mut pc = HardwarePopcount::with_backend(simulated(mode, &fabric));
        assert_eq!(pc.count_file(&path).unwrap(), expected, "{mode}");
    }
}

#[test]
#[ignore] // Requires hardware
fn test_hardware_transports_match_software() {
    let config = DeviceConfig::from_env().expect("config");
    let words = payload(50_000, 0xDEAD_BEEF);
    let expected = HardwarePopcount::with_backend(Box::new(SoftwareBackend::new()))
        .count_array(&words)
        .unwrap();

    for mode in [BackendType::Mmio, BackendType::Dma] {
        let mut pc = HardwarePopcount::open(mode, &config).expect("open");
        assert_eq!(pc.count_array(&words).unwrap(), expected, "{mode}");
    }
}
