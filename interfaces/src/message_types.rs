//! Message Types for inter-layer communication
//!
//! Defines the closed set of messages exchanged between the eNodeB layers.
//! The kind of a message is derived from its payload variant, so a kind can
//! never disagree with the data it carries.

use crate::InterfaceError;
use bytes::Bytes;
use common::types::{FnCombo, Layer, Rnti};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;

/// Maximum number of random access attempts reported in one PRACH decode
pub const MAX_PRACH_ATTEMPTS: usize = 64;
/// Maximum number of DCI allocations carried in one schedule
pub const MAX_PDCCH_ALLOCS: usize = 10;
/// Maximum size of a decoded uplink transport block in bytes
pub const MAX_TB_BYTES: usize = 12800;

/// Message kinds, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum MessageKind {
    /// Terminates the receive loop of the queue it is sent to
    Kill = 0,
    /// MAC -> PHY downlink schedule
    PdschSchedule,
    /// MAC -> PHY uplink schedule
    PuschSchedule,
    /// PHY -> MAC subframe tick
    ReadyToSend,
    /// PHY -> MAC random access detections
    PrachDecode,
    /// PHY -> MAC control channel decode
    PucchDecode,
    /// PHY -> MAC shared channel decode
    PuschDecode,
}

impl MessageKind {
    /// Human readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Kill => "Kill",
            MessageKind::PdschSchedule => "PDSCH schedule",
            MessageKind::PuschSchedule => "PUSCH schedule",
            MessageKind::ReadyToSend => "Ready to send",
            MessageKind::PrachDecode => "PRACH decode",
            MessageKind::PucchDecode => "PUCCH decode",
            MessageKind::PuschDecode => "PUSCH decode",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vector with a hard upper bound on its length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedVec<T, const N: usize> {
    items: Vec<T>,
}

impl<T, const N: usize> BoundedVec<T, N> {
    /// Maximum number of entries
    pub const CAPACITY: usize = N;

    /// Create an empty vector
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append an entry, failing when the bound is reached
    pub fn push(&mut self, item: T) -> Result<(), InterfaceError> {
        if self.items.len() >= N {
            return Err(InterfaceError::TooManyEntries { max: N });
        }
        self.items.push(item);
        Ok(())
    }

    /// Consume into the inner vector
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T, const N: usize> Default for BoundedVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for BoundedVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T, const N: usize> TryFrom<Vec<T>> for BoundedVec<T, N> {
    type Error = InterfaceError;

    fn try_from(items: Vec<T>) -> Result<Self, Self::Error> {
        if items.len() > N {
            return Err(InterfaceError::TooManyEntries { max: N });
        }
        Ok(Self { items })
    }
}

impl<T: Serialize, const N: usize> Serialize for BoundedVec<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>, const N: usize> Deserialize<'de> for BoundedVec<T, N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        if items.len() > N {
            return Err(D::Error::custom(format!(
                "{} entries exceed the bound of {}",
                items.len(),
                N
            )));
        }
        Ok(Self { items })
    }
}

/// One DCI allocation on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciAllocation {
    /// Addressed user
    pub rnti: Rnti,
    /// Number of resource blocks granted
    pub n_prb: u32,
    /// Modulation and coding scheme index
    pub mcs: u8,
    /// New data indicator
    pub ndi: bool,
    /// Transport block size in bits
    pub tbs_bits: u32,
}

/// Control channel allocations for one subframe
pub type PdcchAllocations = BoundedVec<DciAllocation, MAX_PDCCH_ALLOCS>;

/// MAC -> PHY downlink schedule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdschScheduleMsg {
    /// Downlink allocations
    pub pdcch: PdcchAllocations,
    /// Resource blocks available in the subframe
    pub n_avail_prbs: u32,
    /// Resource blocks scheduled in the subframe
    pub n_sched_prbs: u32,
    /// Target subframe
    pub fn_combo: FnCombo,
}

/// MAC -> PHY uplink schedule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PuschScheduleMsg {
    /// Uplink grants signalled to the users
    pub allocations: PdcchAllocations,
    /// Grants the PHY should attempt to decode
    pub decodes: PdcchAllocations,
    /// Resource blocks available in the subframe
    pub n_avail_prbs: u32,
    /// Resource blocks scheduled in the subframe
    pub n_sched_prbs: u32,
    /// Target subframe
    pub fn_combo: FnCombo,
    /// First unallocated resource block
    pub next_prb: u8,
}

/// PHY -> MAC subframe tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyToSendMsg {
    /// Next downlink subframe to schedule
    pub dl_fn_combo: FnCombo,
    /// Next uplink subframe to schedule
    pub ul_fn_combo: FnCombo,
}

/// One detected random access preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrachAttempt {
    /// Timing advance estimate
    pub timing_adv: u32,
    /// Preamble index
    pub preamble: u32,
}

/// PHY -> MAC random access detections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrachDecodeMsg {
    /// Subframe the preambles were received in
    pub fn_combo: FnCombo,
    /// Detected preambles
    pub attempts: BoundedVec<PrachAttempt, MAX_PRACH_ATTEMPTS>,
}

/// PHY -> MAC control channel decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchDecodeMsg {
    /// Subframe the PUCCH was received in
    pub fn_combo: FnCombo,
}

/// PHY -> MAC shared channel decode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuschDecodeMsg {
    /// Subframe the transport block was received in
    pub fn_combo: FnCombo,
    /// User the grant belonged to
    pub rnti: Rnti,
    /// Decoded transport block
    pub msg: Bytes,
}

/// Payload of a message; the variant determines the message kind
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Kill,
    PdschSchedule(PdschScheduleMsg),
    PuschSchedule(PuschScheduleMsg),
    ReadyToSend(ReadyToSendMsg),
    PrachDecode(PrachDecodeMsg),
    PucchDecode(PucchDecodeMsg),
    PuschDecode(PuschDecodeMsg),
}

impl MessagePayload {
    /// Kind matching this payload
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Kill => MessageKind::Kill,
            MessagePayload::PdschSchedule(_) => MessageKind::PdschSchedule,
            MessagePayload::PuschSchedule(_) => MessageKind::PuschSchedule,
            MessagePayload::ReadyToSend(_) => MessageKind::ReadyToSend,
            MessagePayload::PrachDecode(_) => MessageKind::PrachDecode,
            MessagePayload::PucchDecode(_) => MessageKind::PucchDecode,
            MessagePayload::PuschDecode(_) => MessageKind::PuschDecode,
        }
    }
}

/// A message travelling between layers. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    dest_layer: Layer,
    payload: MessagePayload,
}

impl Message {
    /// Create a new message
    pub fn new(dest_layer: Layer, payload: MessagePayload) -> Self {
        Self { dest_layer, payload }
    }

    /// Create a Kill message
    pub fn kill() -> Self {
        Self::new(Layer::Any, MessagePayload::Kill)
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Destination layer
    pub fn dest_layer(&self) -> Layer {
        self.dest_layer
    }

    /// Borrow the payload
    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    /// Consume the message, yielding its payload
    pub fn into_payload(self) -> MessagePayload {
        self.payload
    }

    /// Whether this is a Kill message
    pub fn is_kill(&self) -> bool {
        matches!(self.payload, MessagePayload::Kill)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.kind(), self.dest_layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_payload() {
        let msg = Message::new(
            Layer::Mac,
            MessagePayload::ReadyToSend(ReadyToSendMsg {
                dl_fn_combo: FnCombo(4),
                ul_fn_combo: FnCombo(8),
            }),
        );
        assert_eq!(msg.kind(), MessageKind::ReadyToSend);
        assert_eq!(msg.dest_layer(), Layer::Mac);
        assert_eq!(msg.to_string(), "Ready to send -> MAC");

        let kill = Message::kill();
        assert!(kill.is_kill());
        assert_eq!(kill.kind(), MessageKind::Kill);
        assert_eq!(kill.dest_layer(), Layer::Any);
    }

    #[test]
    fn test_prach_attempts_bounded() {
        let mut decode = PrachDecodeMsg::default();
        for preamble in 0..MAX_PRACH_ATTEMPTS as u32 {
            decode
                .attempts
                .push(PrachAttempt { timing_adv: 3, preamble })
                .unwrap();
        }
        let overflow = decode.attempts.push(PrachAttempt { timing_adv: 3, preamble: 64 });
        assert!(matches!(overflow, Err(InterfaceError::TooManyEntries { max: 64 })));
        assert_eq!(decode.attempts.len(), MAX_PRACH_ATTEMPTS);
    }

    #[test]
    fn test_bounded_vec_try_from() {
        let allocs: Result<PdcchAllocations, _> = Vec::new().try_into();
        assert!(allocs.unwrap().is_empty());

        let too_many = vec![
            DciAllocation { rnti: Rnti(0x46), n_prb: 1, mcs: 0, ndi: false, tbs_bits: 16 };
            MAX_PDCCH_ALLOCS + 1
        ];
        let allocs: Result<PdcchAllocations, _> = too_many.try_into();
        assert!(allocs.is_err());
    }
}
