//! In-process transport: two connected endpoints over unbounded channels.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError, TransportEvent};
use crate::protocol::Message;

pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    session_id: String,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl MemoryTransport {
    /// Two endpoints; whatever one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let session_id = uuid::Uuid::now_v7().to_string();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(a_rx),
                session_id: session_id.clone(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(b_rx),
                session_id,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx.send(message.clone()).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> TransportEvent {
        if self.closed.load(Ordering::Acquire) {
            return TransportEvent::Closed;
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => TransportEvent::Closed,
            message = rx.recv() => match message {
                Some(message) => TransportEvent::Message(message),
                None => TransportEvent::Closed,
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }
}
