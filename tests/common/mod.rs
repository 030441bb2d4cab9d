//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use mcp_runtime::config::ServerConfig;
use mcp_runtime::protocol::{Message, Notification, Request, RequestId, Response};
use mcp_runtime::server::McpServer;
use mcp_runtime::transport::{Transport, TransportError, TransportEvent};

/// Outbound-only transport that records what it sends and can be told to
/// fail sends.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Message>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, on: bool) {
        self.fail_always.store(on, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    /// Every send call, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected failure".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Io("injected failure".into()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn receive(&self) -> TransportEvent {
        std::future::pending().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        Some("recording".into())
    }
}

/// Transport whose sends park until [`GatedTransport::release`] is called, so
/// a test can act while a send is in flight.
#[derive(Default)]
pub struct GatedTransport {
    gate: Notify,
    entered: Notify,
    fail: AtomicBool,
    sent: Mutex<Vec<Message>>,
    attempts: AtomicUsize,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make released sends fail instead of recording.
    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    /// Let one parked send finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Wait until a send has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate.notified().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected failure".into()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn receive(&self) -> TransportEvent {
        std::future::pending().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        Some("gated".into())
    }
}

/// Server config for tests: heartbeat off so nothing ticks behind our back.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        name: "test-server".into(),
        version: "9.9.9".into(),
        health_enabled: false,
        ..ServerConfig::default()
    }
}

pub fn initialize_request(id: i64, protocol_version: &str) -> Message {
    Request::new(
        id,
        "initialize",
        Some(json!({
            "protocolVersion": protocol_version,
            "capabilities": { "sampling": {} },
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        })),
    )
    .into()
}

pub fn request(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Message {
    Request::new(id, method, params).into()
}

pub fn notification(method: &str, params: Option<Value>) -> Message {
    Notification::new(method, params).into()
}

/// Send `message` and unwrap the response it must produce.
pub async fn call(server: &McpServer, message: Message) -> Response {
    match server.handle_message(message).await {
        Some(Message::Response(response)) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Initialize and mark ready.
pub async fn handshake(server: &McpServer) {
    let response = call(server, initialize_request(0, "2025-06-18")).await;
    assert!(!response.is_error(), "initialize failed: {response:?}");
    assert!(server
        .handle_message(notification("notifications/initialized", None))
        .await
        .is_none());
}

pub fn error_code(response: &Response) -> i32 {
    response
        .error_object()
        .unwrap_or_else(|| panic!("expected an error response, got {response:?}"))
        .code
}
