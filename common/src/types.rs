//! Common Types for the LTE eNodeB
//!
//! Defines fundamental types shared by the message bus and the user context engine

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use thiserror::Error;

/// Errors raised when converting raw values into domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("{what} value {value} out of range")]
    OutOfRange { what: &'static str, value: u32 },

    #[error("Unknown {what}: {text}")]
    Unknown { what: &'static str, text: String },
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// First value of the C-RNTI range (TS 36.321 Table 7.1-1)
    pub const C_RNTI_START: u16 = 0x003D;
    /// Last value of the C-RNTI range
    pub const C_RNTI_END: u16 = 0xFFF3;
    /// Placeholder held by a user context whose C-RNTI has been reset
    pub const UNSET: Self = Self(0xFFFF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether the value lies in the allocable C-RNTI range
    pub fn is_c_rnti(&self) -> bool {
        (Self::C_RNTI_START..=Self::C_RNTI_END).contains(&self.0)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Protocol layer a message is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum Layer {
    Phy = 0,
    Mac,
    Rlc,
    Pdcp,
    Rrc,
    Mme,
    /// Any layer, used for generic messages such as Kill
    Any,
}

impl Layer {
    /// All layers in wire order
    pub const ALL: [Layer; 7] = [
        Layer::Phy,
        Layer::Mac,
        Layer::Rlc,
        Layer::Pdcp,
        Layer::Rrc,
        Layer::Mme,
        Layer::Any,
    ];

    /// Upper-case display text
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Phy => "PHY",
            Layer::Mac => "MAC",
            Layer::Rlc => "RLC",
            Layer::Pdcp => "PDCP",
            Layer::Rrc => "RRC",
            Layer::Mme => "MME",
            Layer::Any => "ANY",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Layer {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .iter()
            .copied()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::Unknown { what: "layer", text: s.to_string() })
    }
}

/// Radio bearer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum RbId {
    Srb0 = 0,
    Srb1,
    Srb2,
    Drb1,
    Drb2,
    Drb3,
    Drb4,
    Drb5,
    Drb6,
    Drb7,
    Drb8,
}

impl RbId {
    /// Number of data radio bearer slots per user
    pub const MAX_DRBS: usize = 8;

    /// All data radio bearers in order
    pub const DRBS: [RbId; Self::MAX_DRBS] = [
        RbId::Drb1,
        RbId::Drb2,
        RbId::Drb3,
        RbId::Drb4,
        RbId::Drb5,
        RbId::Drb6,
        RbId::Drb7,
        RbId::Drb8,
    ];

    /// Data radio bearer by its 1-based number
    pub fn drb(number: u8) -> Result<Self, TypeError> {
        match number {
            1..=8 => Ok(Self::DRBS[(number - 1) as usize]),
            _ => Err(TypeError::OutOfRange { what: "DRB", value: number as u32 }),
        }
    }

    /// Zero-based DRB slot index, `None` for signalling bearers
    pub fn drb_index(&self) -> Option<usize> {
        match self {
            RbId::Srb0 | RbId::Srb1 | RbId::Srb2 => None,
            drb => Some(*drb as usize - RbId::Drb1 as usize),
        }
    }

    /// Whether this is a signalling radio bearer
    pub fn is_srb(&self) -> bool {
        self.drb_index().is_none()
    }
}

impl fmt::Display for RbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.drb_index() {
            Some(idx) => write!(f, "DRB{}", idx + 1),
            None => write!(f, "SRB{}", *self as u8),
        }
    }
}

/// Combined system frame / subframe counter (`sfn * 10 + subframe`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FnCombo(pub u32);

impl FnCombo {
    /// Number of distinct combinations (1024 frames of 10 subframes)
    pub const MODULUS: u32 = 10240;

    /// Build from system frame number and subframe
    pub fn new(sfn: u32, subframe: u32) -> Self {
        Self(((sfn % 1024) * 10 + subframe % 10) % Self::MODULUS)
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.0 / 10
    }

    /// Subframe within the frame
    pub fn subframe(&self) -> u32 {
        self.0 % 10
    }

    /// Advance by `n` subframes, wrapping at the hyperframe boundary
    pub fn add(&self, n: u32) -> Self {
        Self((self.0 + n % Self::MODULUS) % Self::MODULUS)
    }
}

impl fmt::Display for FnCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sfn(), self.subframe())
    }
}

/// PLMN Identity (MCC + MNC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlmnId {
    /// Mobile Country Code
    pub mcc: [u8; 3],
    /// Mobile Network Code (2 or 3 digits)
    pub mnc: [u8; 3],
    /// MNC length (2 or 3)
    pub mnc_len: u8,
}

impl PlmnId {
    /// Create a new PLMN ID
    pub fn new(mcc: [u8; 3], mnc: [u8; 3], mnc_len: u8) -> Option<Self> {
        if mnc_len == 2 || mnc_len == 3 {
            Some(Self { mcc, mnc, mnc_len })
        } else {
            None
        }
    }

    /// Encode to 3-byte format used in 3GPP
    pub fn encode(&self) -> [u8; 3] {
        let mut encoded = [0u8; 3];
        encoded[0] = (self.mcc[1] << 4) | self.mcc[0];
        encoded[1] = if self.mnc_len == 2 {
            0xF0 | self.mcc[2]
        } else {
            (self.mnc[2] << 4) | self.mcc[2]
        };
        encoded[2] = (self.mnc[1] << 4) | self.mnc[0];
        encoded
    }
}

/// Globally Unique Temporary Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guti {
    /// Serving network
    pub plmn: PlmnId,
    /// MME group identity
    pub mme_group_id: u16,
    /// MME code
    pub mme_code: u8,
    /// M-TMSI
    pub m_tmsi: u32,
}

/// Permanent identities of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UserId {
    /// International Mobile Subscriber Identity
    pub imsi: u64,
    /// International Mobile Equipment Identity
    pub imei: u64,
}

/// Named scheduling profile of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum QosClass {
    /// No periodic scheduling
    #[default]
    None = 0,
    /// Signalling-only traffic
    Signalling,
    /// Default EPS bearer data
    DefaultData,
}

/// Scheduling parameters of a QoS class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosProfile {
    /// Class this profile belongs to
    pub class: QosClass,
    /// Uplink scheduling period in TTIs
    pub ul_tti_frequency: u32,
    /// Downlink scheduling period in TTIs
    pub dl_tti_frequency: u32,
    /// Uplink budget per scheduled subframe
    pub ul_bytes_per_subfn: u32,
    /// Downlink budget per scheduled subframe
    pub dl_bytes_per_subfn: u32,
}

/// Static QoS table, indexed by `QosClass as usize`
pub const QOS_PROFILES: [QosProfile; 3] = [
    QosProfile {
        class: QosClass::None,
        ul_tti_frequency: 0,
        dl_tti_frequency: 0,
        ul_bytes_per_subfn: 0,
        dl_bytes_per_subfn: 0,
    },
    QosProfile {
        class: QosClass::Signalling,
        ul_tti_frequency: 20,
        dl_tti_frequency: 20,
        ul_bytes_per_subfn: 22,
        dl_bytes_per_subfn: 22,
    },
    QosProfile {
        class: QosClass::DefaultData,
        ul_tti_frequency: 10,
        dl_tti_frequency: 10,
        ul_bytes_per_subfn: 100,
        dl_bytes_per_subfn: 100,
    },
];

impl QosClass {
    /// Scheduling profile for this class
    pub fn profile(&self) -> &'static QosProfile {
        &QOS_PROFILES[*self as usize]
    }
}

impl QosProfile {
    /// Uplink budget per scheduled subframe in bits
    pub fn ul_bits_per_subfn(&self) -> u32 {
        self.ul_bytes_per_subfn * 8
    }

    /// Downlink budget per scheduled subframe in bits
    pub fn dl_bits_per_subfn(&self) -> u32 {
        self.dl_bytes_per_subfn * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_c_rnti_range() {
        assert!(Rnti::new(0x003D).is_c_rnti());
        assert!(Rnti::new(0xFFF3).is_c_rnti());
        assert!(!Rnti::new(0x0001).is_c_rnti());
        assert!(!Rnti::UNSET.is_c_rnti());
    }

    #[test]
    fn test_layer_wire_values() {
        assert_eq!(Layer::from_u32(0), Some(Layer::Phy));
        assert_eq!(Layer::from_u32(6), Some(Layer::Any));
        assert_eq!(Layer::from_u32(7), None);
        assert_eq!("mac".parse::<Layer>().unwrap(), Layer::Mac);
        assert!("sdap".parse::<Layer>().is_err());
    }

    #[test]
    fn test_drb_numbering() {
        assert_eq!(RbId::drb(1).unwrap(), RbId::Drb1);
        assert_eq!(RbId::drb(8).unwrap(), RbId::Drb8);
        assert!(RbId::drb(0).is_err());
        assert!(RbId::drb(9).is_err());
        assert_eq!(RbId::Drb3.drb_index(), Some(2));
        assert_eq!(RbId::Srb2.drb_index(), None);
        assert_eq!(RbId::Drb8.to_string(), "DRB8");
        assert_eq!(RbId::Srb1.to_string(), "SRB1");
    }

    #[test]
    fn test_fn_combo_wraps() {
        let fn_combo = FnCombo::new(1023, 9);
        assert_eq!(fn_combo.0, 10239);
        assert_eq!(fn_combo.add(1), FnCombo(0));
        assert_eq!(FnCombo::new(5, 3).sfn(), 5);
        assert_eq!(FnCombo::new(5, 3).subframe(), 3);
        assert_eq!(FnCombo::new(u32::MAX, 9), FnCombo::new(1023, 9));
        assert_eq!(FnCombo::new(1024 + 7, 2), FnCombo::new(7, 2));
    }

    #[test]
    fn test_qos_table() {
        assert_eq!(QosClass::None.profile().ul_tti_frequency, 0);
        assert_eq!(QosClass::Signalling.profile().ul_tti_frequency, 20);
        assert_eq!(QosClass::Signalling.profile().ul_bits_per_subfn(), 176);
        assert_eq!(QosClass::DefaultData.profile().dl_bytes_per_subfn, 100);
    }

    #[test]
    fn test_plmn_encoding() {
        let plmn = PlmnId::new([2, 0, 8], [9, 3, 0], 2).unwrap();
        let encoded = plmn.encode();
        assert_eq!(encoded, [0x02, 0xF8, 0x39]);
    }
}
