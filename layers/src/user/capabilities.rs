//! Security capabilities advertised by a device
//!
//! Each algorithm family is a set of eight numbered algorithms. The UMTS and
//! GPRS families are optional in the attach request, so they also record
//! whether the device sent them at all.

use bitflags::bitflags;

bitflags! {
    /// Supported algorithms of one family, bit `n` is algorithm `n`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AlgorithmSet: u8 {
        const ALG0 = 1 << 0;
        const ALG1 = 1 << 1;
        const ALG2 = 1 << 2;
        const ALG3 = 1 << 3;
        const ALG4 = 1 << 4;
        const ALG5 = 1 << 5;
        const ALG6 = 1 << 6;
        const ALG7 = 1 << 7;
    }
}

/// Number of algorithms per family
pub const ALGORITHMS_PER_FAMILY: u8 = 8;

impl AlgorithmSet {
    /// Flag of algorithm `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is not in `0..8`.
    pub fn slot(index: u8) -> Self {
        assert!(
            index < ALGORITHMS_PER_FAMILY,
            "algorithm index {} out of range 0..{}",
            index,
            ALGORITHMS_PER_FAMILY
        );
        Self::from_bits_retain(1 << index)
    }

    /// Mark algorithm `index` as supported or not
    pub fn set_support(&mut self, index: u8, supported: bool) {
        self.set(Self::slot(index), supported);
    }

    /// Whether algorithm `index` is supported
    pub fn supports(&self, index: u8) -> bool {
        self.contains(Self::slot(index))
    }

    /// Number of supported algorithms
    pub fn count(&self) -> u32 {
        self.bits().count_ones()
    }
}

/// Optional algorithm family with a presence flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyAlgorithms {
    pub supported: AlgorithmSet,
    /// Whether the device advertised this family
    pub present: bool,
}

/// Security capabilities of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// EPS encryption algorithms
    pub eea: AlgorithmSet,
    /// EPS integrity algorithms
    pub eia: AlgorithmSet,
    /// UMTS encryption algorithms
    pub uea: LegacyAlgorithms,
    /// UMTS integrity algorithms
    pub uia: LegacyAlgorithms,
    /// GPRS encryption algorithms
    pub gea: LegacyAlgorithms,
}
