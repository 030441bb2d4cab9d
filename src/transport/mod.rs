//! The channel contract the runtime drives.
//!
//! A transport moves whole [`Message`]s. Inbound traffic, faults and closure
//! arrive as a single ordered stream of [`TransportEvent`]s; the server turns
//! those into its `on_error` / `on_close` callbacks.

pub mod memory;
pub mod stream;

use async_trait::async_trait;

use crate::framing::MessageError;
use crate::protocol::Message;

pub use memory::MemoryTransport;
pub use stream::StreamTransport;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("transport closed")]
    Closed,
    #[error("transport not started")]
    NotStarted,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// One item of inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Message),
    /// Recoverable fault; the transport remains usable.
    Error(TransportError),
    /// Peer went away. No further events follow.
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the channel. Idempotent.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send one message.
    async fn send(&self, message: &Message) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    async fn receive(&self) -> TransportEvent;

    /// Close the channel. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Identifier of this connection, if the transport has one.
    fn session_id(&self) -> Option<String>;
}
