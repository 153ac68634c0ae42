//! Fixed-size wire records
//!
//! When layers run in separate processes, messages travel as records of one
//! uniform size: a little-endian `u32` kind, a little-endian `u32` destination
//! layer, then a payload area sized for the largest payload and zero padded.
//! The payload area holds the bincode encoding of the payload struct.

use crate::message_types::{Message, MessageKind, MessagePayload, MAX_TB_BYTES};
use crate::InterfaceError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::types::Layer;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::Serialize;

/// Size of the kind and destination header
pub const HEADER_SIZE: usize = 8;
/// Size of the payload area, large enough for a maximum transport block
pub const MAX_PAYLOAD_SIZE: usize = MAX_TB_BYTES + 32;
/// Size of every record
pub const RECORD_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, InterfaceError> {
    Ok(bincode::serialize(payload)?)
}

/// Encode a message into a fixed-size record
pub fn encode_record(msg: &Message) -> Result<Bytes, InterfaceError> {
    let body = match msg.payload() {
        MessagePayload::Kill => Vec::new(),
        MessagePayload::PdschSchedule(m) => encode_payload(m)?,
        MessagePayload::PuschSchedule(m) => encode_payload(m)?,
        MessagePayload::ReadyToSend(m) => encode_payload(m)?,
        MessagePayload::PrachDecode(m) => encode_payload(m)?,
        MessagePayload::PucchDecode(m) => encode_payload(m)?,
        MessagePayload::PuschDecode(m) => encode_payload(m)?,
    };
    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(InterfaceError::RecordTooLarge {
            size: body.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let kind = msg.kind().to_u32().unwrap_or_default();
    let dest = msg.dest_layer().to_u32().unwrap_or_default();

    let mut buf = BytesMut::with_capacity(RECORD_SIZE);
    buf.put_u32_le(kind);
    buf.put_u32_le(dest);
    buf.put_slice(&body);
    buf.resize(RECORD_SIZE, 0);
    Ok(buf.freeze())
}

/// Decode a fixed-size record back into a message
pub fn decode_record(record: &[u8]) -> Result<Message, InterfaceError> {
    if record.len() != RECORD_SIZE {
        return Err(InterfaceError::InvalidMessage(format!(
            "record length {} (expected {})",
            record.len(),
            RECORD_SIZE
        )));
    }

    let mut header = &record[..HEADER_SIZE];
    let kind_raw = header.get_u32_le();
    let dest_raw = header.get_u32_le();

    let kind = MessageKind::from_u32(kind_raw)
        .ok_or_else(|| InterfaceError::InvalidMessage(format!("unknown message type {}", kind_raw)))?;
    let dest_layer = Layer::from_u32(dest_raw)
        .ok_or_else(|| InterfaceError::InvalidMessage(format!("unknown destination layer {}", dest_raw)))?;

    let body = &record[HEADER_SIZE..];
    let payload = match kind {
        MessageKind::Kill => MessagePayload::Kill,
        MessageKind::PdschSchedule => MessagePayload::PdschSchedule(bincode::deserialize(body)?),
        MessageKind::PuschSchedule => MessagePayload::PuschSchedule(bincode::deserialize(body)?),
        MessageKind::ReadyToSend => MessagePayload::ReadyToSend(bincode::deserialize(body)?),
        MessageKind::PrachDecode => MessagePayload::PrachDecode(bincode::deserialize(body)?),
        MessageKind::PucchDecode => MessagePayload::PucchDecode(bincode::deserialize(body)?),
        MessageKind::PuschDecode => MessagePayload::PuschDecode(bincode::deserialize(body)?),
    };

    Ok(Message::new(dest_layer, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_types::{PrachAttempt, PrachDecodeMsg, PuschDecodeMsg, ReadyToSendMsg};
    use common::types::{FnCombo, Rnti};

    #[test]
    fn test_prach_record() {
        let mut decode = PrachDecodeMsg {
            fn_combo: FnCombo::new(12, 1),
            ..Default::default()
        };
        decode.attempts.push(PrachAttempt { timing_adv: 7, preamble: 22 }).unwrap();
        decode.attempts.push(PrachAttempt { timing_adv: 1, preamble: 41 }).unwrap();
        let msg = Message::new(Layer::Mac, MessagePayload::PrachDecode(decode));

        let record = encode_record(&msg).unwrap();
        assert_eq!(record.len(), RECORD_SIZE);
        assert_eq!(decode_record(&record).unwrap(), msg);
    }

    #[test]
    fn test_records_are_uniform() {
        let kill = encode_record(&Message::kill()).unwrap();
        let rts = encode_record(&Message::new(
            Layer::Mac,
            MessagePayload::ReadyToSend(ReadyToSendMsg::default()),
        ))
        .unwrap();
        assert_eq!(kill.len(), rts.len());
        assert_eq!(&kill[..HEADER_SIZE], &[0, 0, 0, 0, 6, 0, 0, 0]);
        assert!(decode_record(&kill).unwrap().is_kill());
    }

    #[test]
    fn test_max_transport_block_fits() {
        let msg = Message::new(
            Layer::Mac,
            MessagePayload::PuschDecode(PuschDecodeMsg {
                fn_combo: FnCombo(3),
                rnti: Rnti(0x46),
                msg: Bytes::from(vec![0xA5; MAX_TB_BYTES]),
            }),
        );
        let record = encode_record(&msg).unwrap();
        assert_eq!(decode_record(&record).unwrap(), msg);

        let oversize = Message::new(
            Layer::Mac,
            MessagePayload::PuschDecode(PuschDecodeMsg {
                fn_combo: FnCombo(3),
                rnti: Rnti(0x46),
                msg: Bytes::from(vec![0; MAX_PAYLOAD_SIZE]),
            }),
        );
        assert!(matches!(
            encode_record(&oversize),
            Err(InterfaceError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut record = vec![0u8; RECORD_SIZE];
        record[0] = 42;
        assert!(matches!(
            decode_record(&record),
            Err(InterfaceError::InvalidMessage(_))
        ));

        let mut record = vec![0u8; RECORD_SIZE];
        record[4] = 9;
        assert!(matches!(
            decode_record(&record),
            Err(InterfaceError::InvalidMessage(_))
        ));

        assert!(decode_record(&[0u8; 4]).is_err());
    }
}
