//! Outbound fire-and-forget delivery with bounded retry, plus resource
//! subscriptions.
//!
//! Delivery is best-effort: a failed send is re-queued at the tail and
//! retried up to `max_retries` times, then dropped with a warning. Queued
//! notifications keep FIFO order among themselves.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::protocol::{methods, Message, Notification};
use crate::transport::Transport;

/// Default number of retries after the first failed send.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub max_retries: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Severity for `notifications/message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

struct QueuedNotification {
    notification: Notification,
    key: u64,
}

#[derive(Default)]
struct DeliveryState {
    queue: VecDeque<QueuedNotification>,
    retries: HashMap<u64, u32>,
    transport: Option<Arc<dyn Transport>>,
    draining: bool,
    /// Bumped by `close`; entries popped before a close are not re-queued.
    epoch: u64,
}

/// Held for the duration of a drain. Clears the drain flag and, if the drain
/// future was dropped mid-send, puts the in-flight entry back at the front.
struct DrainGuard<'a> {
    state: &'a Mutex<DeliveryState>,
    in_flight: Option<(QueuedNotification, u64)>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.draining = false;
        if let Some((entry, epoch)) = self.in_flight.take() {
            if state.epoch == epoch {
                debug!(method = %entry.notification.method, "drain interrupted, notification re-queued");
                state.queue.push_front(entry);
            }
        }
    }
}

/// Queues and delivers outbound notifications for one connection.
pub struct NotificationManager {
    config: NotificationConfig,
    state: Mutex<DeliveryState>,
    subscriptions: RwLock<HashMap<String, Value>>,
}

impl NotificationManager {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DeliveryState::default()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a transport; anything queued while detached is drained now.
    pub async fn attach_transport(&self, transport: Arc<dyn Transport>) {
        let pending = {
            let mut state = self.state.lock();
            state.transport = Some(transport);
            state.queue.len()
        };
        if pending > 0 {
            debug!(pending, "transport attached, draining queued notifications");
            self.drain().await;
        }
    }

    /// Stop delivering; new sends are queued until a transport is attached.
    pub fn detach_transport(&self) {
        self.state.lock().transport = None;
    }

    /// Detach and discard everything queued. Nothing is flushed.
    pub fn close(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.retries.clear();
        state.transport = None;
        state.epoch += 1;
        if dropped > 0 {
            debug!(dropped, "notification queue cleared on close");
        }
    }

    /// Number of notifications waiting for delivery.
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Enqueue and, if possible, deliver immediately.
    pub async fn send(&self, notification: Notification) {
        let key = retry_key(&notification);
        let should_drain = {
            let mut state = self.state.lock();
            state.queue.push_back(QueuedNotification { notification, key });
            state.transport.is_some() && !state.draining
        };
        if should_drain {
            self.drain().await;
        }
    }

    pub async fn send_message(&self, method: impl Into<String>, params: Option<Value>) {
        self.send(Notification::new(method, params)).await;
    }

    pub async fn resource_list_changed(&self) {
        self.send_message(methods::RESOURCE_LIST_CHANGED, None).await;
    }

    /// Announce a change to `uri`. Suppressed unless someone subscribed to it.
    pub async fn resource_updated(&self, uri: &str) {
        if !self.is_subscribed(uri) {
            trace!(uri, "resource update suppressed, no subscriber");
            return;
        }
        self.send_message(methods::RESOURCE_UPDATED, Some(json!({ "uri": uri })))
            .await;
    }

    pub async fn tool_list_changed(&self) {
        self.send_message(methods::TOOL_LIST_CHANGED, None).await;
    }

    pub async fn prompt_list_changed(&self) {
        self.send_message(methods::PROMPT_LIST_CHANGED, None).await;
    }

    /// `notifications/message`: a log record for the peer.
    pub async fn log_message(&self, level: LogLevel, logger: Option<&str>, data: Value) {
        let mut params = json!({ "level": level.as_str(), "data": data });
        if let Some(logger) = logger {
            params["logger"] = json!(logger);
        }
        self.send_message(methods::LOG_MESSAGE, Some(params)).await;
    }

    /// `notifications/progress` for a long-running request.
    pub async fn progress(&self, progress_token: Value, progress: f64, total: Option<f64>) {
        let mut params = json!({ "progressToken": progress_token, "progress": progress });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        self.send_message(methods::PROGRESS, Some(params)).await;
    }

    pub fn subscribe(&self, uri: impl Into<String>, options: Value) {
        let uri = uri.into();
        debug!(uri = %uri, "resource subscribed");
        self.subscriptions.write().insert(uri, options);
    }

    /// Returns whether a subscription existed.
    pub fn unsubscribe(&self, uri: &str) -> bool {
        let removed = self.subscriptions.write().remove(uri).is_some();
        if removed {
            debug!(uri, "resource unsubscribed");
        }
        removed
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.read().contains_key(uri)
    }

    /// Snapshot of `uri -> options`.
    pub fn subscriptions(&self) -> HashMap<String, Value> {
        self.subscriptions.read().clone()
    }

    /// Deliver queued notifications until the queue is empty. Sends that
    /// arrive mid-drain are picked up by the same pass.
    async fn drain(&self) {
        let mut guard = {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
            DrainGuard {
                state: &self.state,
                in_flight: None,
            }
        };

        loop {
            let (message, transport) = {
                let mut state = self.state.lock();
                let Some(transport) = state.transport.clone() else {
                    return;
                };
                let Some(entry) = state.queue.pop_front() else {
                    return;
                };
                let message = Message::Notification(entry.notification.clone());
                guard.in_flight = Some((entry, state.epoch));
                (message, transport)
            };

            let outcome = transport.send(&message).await;
            let Some((entry, epoch)) = guard.in_flight.take() else {
                return;
            };
            let mut state = self.state.lock();
            match outcome {
                Ok(()) => {
                    state.retries.remove(&entry.key);
                }
                Err(e) if state.epoch != epoch => {
                    debug!(method = %entry.notification.method, error = %e, "send failed after close, notification dropped");
                }
                Err(e) => {
                    let failures = {
                        let count = state.retries.entry(entry.key).or_insert(0);
                        *count += 1;
                        *count
                    };
                    if failures > self.config.max_retries {
                        state.retries.remove(&entry.key);
                        warn!(
                            method = %entry.notification.method,
                            attempts = failures,
                            error = %e,
                            "dropping notification after retry limit"
                        );
                    } else {
                        debug!(method = %entry.notification.method, failures, error = %e, "notification send failed, re-queued");
                        state.queue.push_back(entry);
                    }
                }
            }
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}

fn retry_key(notification: &Notification) -> u64 {
    let mut hasher = DefaultHasher::new();
    notification.method.hash(&mut hasher);
    notification
        .params
        .as_ref()
        .map(Value::to_string)
        .hash(&mut hasher);
    hasher.finish()
}
