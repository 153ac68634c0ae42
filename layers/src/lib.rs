//! Protocol Stack Layers Library
//!
//! This crate holds the per-user session engine of the eNodeB and the layer
//! glue built on top of the message bus: timers, user contexts and their
//! radio bearers, the user directory, and the MAC layer.

pub mod mac;
pub mod timer_mgr;
pub mod user;
pub mod user_mgr;

use common::types::{Layer, RbId, Rnti};
use interfaces::{InterfaceError, Message, MessageQueue, MsgqRegistry};
use std::sync::Arc;
use thiserror::Error;
use timer_mgr::TimerId;
use tracing::warn;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Radio bearer {0} already set up")]
    AlreadySetup(RbId),

    #[error("Radio bearer {0} not set up")]
    NotSetup(RbId),

    #[error("Operation not valid for radio bearer {0}")]
    InvalidBearer(RbId),

    #[error("Invalid timer id {0}")]
    InvalidTimerId(TimerId),

    #[error("Index {index} out of range, maximum is {max}")]
    IndexOutOfRange { index: usize, max: usize },

    #[error("No free C-RNTI")]
    NoFreeCRnti,

    #[error("C-RNTI {0} already in use")]
    CRntiInUse(Rnti),

    #[error("No user with C-RNTI {0}")]
    UserNotFound(Rnti),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

/// A protocol layer that consumes messages from its receive queue
pub trait LayerHandler: Send + Sync + 'static {
    /// Layer this handler implements
    fn layer(&self) -> Layer;

    /// Process one message dequeued from the layer's queue
    fn handle_message(&self, msg: Message);
}

/// Create the receive queue of a layer and bind its handler as the callback
pub fn start_layer_queue<H: LayerHandler>(
    handler: Arc<H>,
    registry: &Arc<MsgqRegistry>,
    name: &str,
    capacity: usize,
) -> Result<MessageQueue, LayerError> {
    let queue = MessageQueue::new(registry, name, capacity, move |msg: Message| {
        let dest = msg.dest_layer();
        if dest != handler.layer() && dest != Layer::Any {
            warn!("{} queue received {} addressed to {}", handler.layer(), msg.kind(), dest);
            return;
        }
        handler.handle_message(msg);
    })?;
    Ok(queue)
}
