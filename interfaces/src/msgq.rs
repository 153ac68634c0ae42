//! Named message queues between layers
//!
//! Every layer owns one receive queue. Other layers send into it by name
//! through the [`MsgqRegistry`] or through a cloned [`MsgqHandle`]. A
//! dedicated thread per queue pulls messages in FIFO order and hands them,
//! one at a time, to the callback bound when the queue was created.
//!
//! Queues are bounded. `send` blocks while the target queue is full; this is
//! the only backpressure in the system. `try_send` fails with
//! [`InterfaceError::QueueFull`] instead.

use crate::message_types::{Message, MessagePayload};
use crate::InterfaceError;
use common::types::Layer;
use crossbeam_channel::{bounded, Receiver, SendError, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Default number of messages a queue holds before senders block
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Conventional queue name for messages flowing from `from` to `to`
pub fn queue_name(from: Layer, to: Layer) -> String {
    format!(
        "{}_{}_mq",
        from.as_str().to_lowercase(),
        to.as_str().to_lowercase()
    )
}

/// Registry of live queues, shared by every layer of one process
#[derive(Debug, Default)]
pub struct MsgqRegistry {
    queues: Mutex<HashMap<String, Sender<Message>>>,
}

impl MsgqRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get a send handle for a named queue
    pub fn handle(&self, name: &str) -> Result<MsgqHandle, InterfaceError> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .get(name)
            .map(|tx| MsgqHandle {
                name: name.to_string(),
                tx: tx.clone(),
            })
            .ok_or_else(|| InterfaceError::QueueUnavailable(name.to_string()))
    }

    /// Send a message to a named queue, blocking while it is full
    pub fn send(
        &self,
        name: &str,
        dest_layer: Layer,
        payload: MessagePayload,
    ) -> Result<(), InterfaceError> {
        self.handle(name)?.send(dest_layer, payload)
    }

    /// Send a message to a named queue without blocking
    pub fn try_send(
        &self,
        name: &str,
        dest_layer: Layer,
        payload: MessagePayload,
    ) -> Result<(), InterfaceError> {
        self.handle(name)?.try_send(dest_layer, payload)
    }

    /// Whether a queue with this name is currently registered
    pub fn contains(&self, name: &str) -> bool {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.contains_key(name)
    }

    fn register(&self, name: &str, tx: Sender<Message>) -> Result<(), InterfaceError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(name) {
            return Err(InterfaceError::QueueExists(name.to_string()));
        }
        queues.insert(name.to_string(), tx);
        Ok(())
    }

    fn deregister(&self, name: &str) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.remove(name);
    }
}

/// Cloneable sender bound to one queue
#[derive(Debug, Clone)]
pub struct MsgqHandle {
    name: String,
    tx: Sender<Message>,
}

impl MsgqHandle {
    /// Name of the target queue
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a message, blocking while the queue is full
    pub fn send(&self, dest_layer: Layer, payload: MessagePayload) -> Result<(), InterfaceError> {
        let msg = Message::new(dest_layer, payload);
        trace!("msgq {}: send {}", self.name, msg);
        self.tx
            .send(msg)
            .map_err(|SendError(_)| InterfaceError::QueueUnavailable(self.name.clone()))
    }

    /// Send a message without blocking
    pub fn try_send(&self, dest_layer: Layer, payload: MessagePayload) -> Result<(), InterfaceError> {
        let msg = Message::new(dest_layer, payload);
        trace!("msgq {}: try_send {}", self.name, msg);
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => InterfaceError::QueueFull(self.name.clone()),
            TrySendError::Disconnected(_) => InterfaceError::QueueUnavailable(self.name.clone()),
        })
    }
}

/// A layer's receive queue together with its receive loop
pub struct MessageQueue {
    name: String,
    registry: Arc<MsgqRegistry>,
    tx: Sender<Message>,
    rx_thread: Option<JoinHandle<()>>,
}

impl MessageQueue {
    /// Create a queue, register it under `name` and start its receive loop
    pub fn new<F>(
        registry: &Arc<MsgqRegistry>,
        name: impl Into<String>,
        capacity: usize,
        callback: F,
    ) -> Result<Self, InterfaceError>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = bounded(capacity.max(1));
        registry.register(&name, tx.clone())?;

        let loop_name = name.clone();
        let rx_thread = thread::Builder::new()
            .name(format!("msgq-{}", name))
            .spawn(move || receive_loop(&loop_name, rx, callback));
        let rx_thread = match rx_thread {
            Ok(handle) => handle,
            Err(e) => {
                registry.deregister(&name);
                return Err(e.into());
            }
        };

        info!("Created message queue {} (capacity {})", name, capacity.max(1));
        Ok(Self {
            name,
            registry: registry.clone(),
            tx,
            rx_thread: Some(rx_thread),
        })
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send handle for this queue
    pub fn handle(&self) -> MsgqHandle {
        MsgqHandle {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Stop the receive loop and release the name
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(rx_thread) = self.rx_thread.take() else {
            return;
        };

        self.registry.deregister(&self.name);
        if self.tx.send(Message::kill()).is_err() {
            debug!("msgq {}: receive loop already gone", self.name);
        }

        if rx_thread.thread().id() == thread::current().id() {
            warn!("msgq {}: shut down from its own receive loop, not joining", self.name);
            return;
        }
        if rx_thread.join().is_err() {
            warn!("msgq {}: receive loop panicked", self.name);
        }
        info!("Destroyed message queue {}", self.name);
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<F>(name: &str, rx: Receiver<Message>, mut callback: F)
where
    F: FnMut(Message),
{
    while let Ok(msg) = rx.recv() {
        if msg.is_kill() {
            debug!("msgq {}: received Kill", name);
            break;
        }
        trace!("msgq {}: dispatch {}", name, msg);
        callback(msg);
    }

    let discarded = rx.try_iter().filter(|msg| !msg.is_kill()).count();
    if discarded > 0 {
        debug!("msgq {}: discarded {} messages queued after Kill", name, discarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_types::{PucchDecodeMsg, ReadyToSendMsg};
    use common::types::FnCombo;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn tagged(sender: u32, seq: u32) -> MessagePayload {
        MessagePayload::ReadyToSend(ReadyToSendMsg {
            dl_fn_combo: FnCombo(sender),
            ul_fn_combo: FnCombo(seq),
        })
    }

    #[test]
    fn test_queue_name() {
        assert_eq!(queue_name(Layer::Phy, Layer::Mac), "phy_mac_mq");
        assert_eq!(queue_name(Layer::Rrc, Layer::Mme), "rrc_mme_mq");
    }

    #[test]
    fn test_per_sender_fifo() {
        let registry = MsgqRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let queue = MessageQueue::new(&registry, "fifo_mq", 8, move |msg| {
            if let MessagePayload::ReadyToSend(rts) = msg.into_payload() {
                sink.lock().unwrap().push((rts.dl_fn_combo.0, rts.ul_fn_combo.0));
            }
        })
        .unwrap();

        let senders: Vec<_> = (0..3)
            .map(|sender| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for seq in 0..200 {
                        registry.send("fifo_mq", Layer::Mac, tagged(sender, seq)).unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }
        queue.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 600);
        for sender in 0..3 {
            let order: Vec<u32> = seen
                .iter()
                .filter(|(s, _)| *s == sender)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(order, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_send_to_missing_queue() {
        let registry = MsgqRegistry::new();
        let result = registry.send("nowhere_mq", Layer::Mac, MessagePayload::Kill);
        assert!(matches!(result, Err(InterfaceError::QueueUnavailable(name)) if name == "nowhere_mq"));
    }

    #[test]
    fn test_duplicate_queue_name() {
        let registry = MsgqRegistry::new();
        let _first = MessageQueue::new(&registry, "dup_mq", 4, |_| {}).unwrap();
        let second = MessageQueue::new(&registry, "dup_mq", 4, |_| {});
        assert!(matches!(second, Err(InterfaceError::QueueExists(_))));
    }

    #[test]
    fn test_send_after_shutdown() {
        let registry = MsgqRegistry::new();
        let queue = MessageQueue::new(&registry, "gone_mq", 4, |_| {}).unwrap();
        let handle = queue.handle();
        queue.shutdown();

        assert!(!registry.contains("gone_mq"));
        let by_name = registry.send("gone_mq", Layer::Mac, MessagePayload::Kill);
        assert!(matches!(by_name, Err(InterfaceError::QueueUnavailable(_))));
        let payload = MessagePayload::PucchDecode(PucchDecodeMsg::default());
        assert!(matches!(
            handle.send(Layer::Mac, payload),
            Err(InterfaceError::QueueUnavailable(_))
        ));
    }

    #[test]
    fn test_messages_after_kill_discarded() {
        let registry = MsgqRegistry::new();
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let queue = MessageQueue::new(&registry, "kill_mq", 8, move |msg| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            sink.lock().unwrap().push(msg.kind());
        })
        .unwrap();
        let handle = queue.handle();

        handle.send(Layer::Mac, tagged(0, 0)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        handle.send(Layer::Any, MessagePayload::Kill).unwrap();
        handle
            .send(Layer::Mac, MessagePayload::PucchDecode(PucchDecodeMsg::default()))
            .unwrap();
        release_tx.send(()).unwrap();
        queue.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[crate::MessageKind::ReadyToSend]);
    }

    #[test]
    fn test_try_send_full_queue() {
        let registry = MsgqRegistry::new();
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        let queue = MessageQueue::new(&registry, "full_mq", 1, move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();

        registry.send("full_mq", Layer::Mac, tagged(0, 0)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        registry.try_send("full_mq", Layer::Mac, tagged(0, 1)).unwrap();
        let full = registry.try_send("full_mq", Layer::Mac, tagged(0, 2));
        assert!(matches!(full, Err(InterfaceError::QueueFull(_))));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        queue.shutdown();
    }
}
