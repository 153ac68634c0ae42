//! Inter-process message queues
//!
//! Carries fixed-size wire records over ZeroMQ PUSH/PULL sockets on `ipc://`
//! endpoints named after the queue. The high water mark of both ends is the
//! queue capacity, so a sender blocks while the receiver is backlogged.

use crate::message_types::{Message, MessagePayload};
use crate::wire::{decode_record, encode_record};
use crate::InterfaceError;
use common::types::Layer;
use std::time::Duration;
use tracing::{debug, info};
use zmq::Context;

/// Milliseconds a closing sender keeps trying to deliver queued records
const SEND_LINGER_MS: i32 = 100;

/// Endpoint of the socket backing a named queue
pub fn endpoint(name: &str) -> String {
    format!(
        "ipc://{}/lte_fdd_enb_{}",
        std::env::temp_dir().display(),
        name
    )
}

fn hwm(capacity: usize) -> i32 {
    i32::try_from(capacity).unwrap_or(i32::MAX)
}

/// Receiving end of a named inter-process queue
pub struct IpcReceiver {
    name: String,
    socket: zmq::Socket,
    _context: Context,
}

impl IpcReceiver {
    /// Create the named queue holding up to `capacity` records
    pub fn bind(name: &str, capacity: usize) -> Result<Self, InterfaceError> {
        let context = Context::new();
        let socket = context.socket(zmq::PULL)?;
        socket.set_rcvhwm(hwm(capacity))?;
        socket.bind(&endpoint(name)).map_err(|e| match e {
            zmq::Error::EADDRINUSE => InterfaceError::QueueExists(name.to_string()),
            e => e.into(),
        })?;
        info!("ZMQ PULL socket bound to {}", endpoint(name));

        Ok(Self {
            name: name.to_string(),
            socket,
            _context: context,
        })
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Limit how long `recv` waits; `None` waits forever
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), InterfaceError> {
        let ms = timeout.map_or(-1, |t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX));
        Ok(self.socket.set_rcvtimeo(ms)?)
    }

    /// Wait for the next message
    ///
    /// Fails with `zmq::Error::EAGAIN` once the timeout elapsed.
    pub fn recv(&self) -> Result<Message, InterfaceError> {
        let record = self.socket.recv_bytes(0)?;
        debug!("Received {} byte record on {}", record.len(), self.name);
        decode_record(&record)
    }
}

/// Sending end of a named inter-process queue
pub struct IpcSender {
    name: String,
    socket: zmq::Socket,
    _context: Context,
}

impl IpcSender {
    /// Connect to the named queue, buffering up to `capacity` records
    ///
    /// The queue does not need to exist yet. Until it is bound `send` blocks
    /// and `try_send` reports the queue full.
    pub fn connect(name: &str, capacity: usize) -> Result<Self, InterfaceError> {
        let context = Context::new();
        let socket = context.socket(zmq::PUSH)?;
        socket.set_sndhwm(hwm(capacity))?;
        socket.set_linger(SEND_LINGER_MS)?;
        socket.set_immediate(true)?;
        socket.connect(&endpoint(name))?;
        debug!("ZMQ PUSH socket connected to {}", endpoint(name));

        Ok(Self {
            name: name.to_string(),
            socket,
            _context: context,
        })
    }

    /// Send a message, blocking while the receiver is backlogged
    pub fn send(&self, dest_layer: Layer, payload: MessagePayload) -> Result<(), InterfaceError> {
        let record = encode_record(&Message::new(dest_layer, payload))?;
        self.socket.send(&record[..], 0)?;
        Ok(())
    }

    /// Send a message, failing with `QueueFull` instead of blocking
    pub fn try_send(&self, dest_layer: Layer, payload: MessagePayload) -> Result<(), InterfaceError> {
        let record = encode_record(&Message::new(dest_layer, payload))?;
        match self.socket.send(&record[..], zmq::DONTWAIT) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) => Err(InterfaceError::QueueFull(self.name.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_types::{PucchDecodeMsg, ReadyToSendMsg};
    use common::types::FnCombo;

    #[test]
    fn test_ipc_round_trip() {
        let name = format!("ipc_test_{}", std::process::id());
        let rx = IpcReceiver::bind(&name, 16).unwrap();
        rx.set_timeout(Some(Duration::from_secs(2))).unwrap();
        let tx = IpcSender::connect(&name, 16).unwrap();

        tx.send(
            Layer::Mac,
            MessagePayload::ReadyToSend(ReadyToSendMsg {
                dl_fn_combo: FnCombo(10),
                ul_fn_combo: FnCombo(14),
            }),
        )
        .unwrap();
        tx.send(Layer::Mac, MessagePayload::PucchDecode(PucchDecodeMsg { fn_combo: FnCombo(2) }))
            .unwrap();

        let first = rx.recv().unwrap();
        assert_eq!(first.kind(), crate::MessageKind::ReadyToSend);
        assert_eq!(first.dest_layer(), Layer::Mac);
        let second = rx.recv().unwrap();
        assert_eq!(second.kind(), crate::MessageKind::PucchDecode);
    }

    #[test]
    fn test_ipc_try_send_without_receiver() {
        let name = format!("ipc_unbound_{}", std::process::id());
        let tx = IpcSender::connect(&name, 4).unwrap();
        let result = tx.try_send(
            Layer::Mac,
            MessagePayload::PucchDecode(PucchDecodeMsg { fn_combo: FnCombo(0) }),
        );
        assert!(matches!(result, Err(InterfaceError::QueueFull(_))));
    }

    #[test]
    fn test_ipc_recv_timeout() {
        let name = format!("ipc_idle_{}", std::process::id());
        let rx = IpcReceiver::bind(&name, 4).unwrap();
        rx.set_timeout(Some(Duration::from_millis(20))).unwrap();
        assert!(matches!(rx.recv(), Err(InterfaceError::Zmq(zmq::Error::EAGAIN))));
    }
}
