//! Inter-layer Message Bus Library
//!
//! This crate provides the named message queues that carry typed events between
//! the eNodeB protocol layers, and the fixed-size record format used when the
//! layers run in separate processes.

pub mod message_types;
pub mod msgq;
pub mod wire;
#[cfg(unix)]
pub mod ipc;

pub use message_types::{Message, MessageKind, MessagePayload};
pub use msgq::{MessageQueue, MsgqHandle, MsgqRegistry};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Message queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Message queue already exists: {0}")]
    QueueExists(String),

    #[error("Message queue full: {0}")]
    QueueFull(String),

    #[error("Record of {size} bytes exceeds maximum of {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Too many entries, maximum is {max}")]
    TooManyEntries { max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),
}
