//! Common Utilities
//!
//! Provides utility functions used across the eNodeB implementation

use std::time::Duration;
use tracing::trace;

/// Duration of one LTE transmission time interval
pub const TTI: Duration = Duration::from_millis(1);

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert a period expressed in TTIs to milliseconds
pub fn ttis_to_ms(ttis: u32) -> u64 {
    let ms = ttis as u64 * TTI.as_millis() as u64;
    trace!("{} TTIs = {} ms", ttis, ms);
    ms
}

/// Number of resource blocks needed to carry `bits` at `bits_per_prb`, capped at `max_prbs`
pub fn prbs_for_bits(bits: u32, bits_per_prb: u32, max_prbs: u32) -> u32 {
    if bits_per_prb == 0 {
        return 0;
    }
    bits.div_ceil(bits_per_prb).min(max_prbs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_ttis_to_ms() {
        assert_eq!(ttis_to_ms(20), 20);
        assert_eq!(ttis_to_ms(0), 0);
    }

    #[test]
    fn test_prbs_for_bits() {
        assert_eq!(prbs_for_bits(176, 100, 25), 2);
        assert_eq!(prbs_for_bits(800, 100, 25), 8);
        assert_eq!(prbs_for_bits(10_000, 100, 25), 25);
        assert_eq!(prbs_for_bits(0, 100, 25), 0);
        assert_eq!(prbs_for_bits(10, 0, 25), 0);
    }
}
