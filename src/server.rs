use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationRegistry;
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::handlers::{CancellableHandler, HandlerRegistry, NotificationHandler, RequestHandler};
use crate::health::HealthMonitor;
use crate::notifications::NotificationManager;
use crate::protocol::{
    methods, negotiate_version, CancelledParams, ErrorObject, Implementation, InitializeParams,
    InitializeResult, ListChangedCapability, Message, Notification, Request, RequestId,
    ResourcesCapability, Response, ResponseOutcome, ServerCapabilities,
};
use crate::resilience::Resilience;
use crate::transport::{Transport, TransportError, TransportEvent};

pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Session {
    initialized: bool,
    ready: bool,
    protocol_version: Option<&'static str>,
    peer_capabilities: Option<Value>,
    peer_info: Option<Implementation>,
}

#[derive(Default)]
struct Callbacks {
    ready: Vec<LifecycleCallback>,
    error: Vec<ErrorCallback>,
    close: Vec<LifecycleCallback>,
}

type PendingReply = oneshot::Sender<Result<Value, McpError>>;

/// MCP server for one connection.
///
/// Register handlers, wrap in an `Arc`, then [`serve`](Self::serve) a
/// transport. [`handle_message`](Self::handle_message) runs the same dispatch
/// logic without a transport.
pub struct McpServer {
    config: ServerConfig,
    handlers: HandlerRegistry,
    session: RwLock<Session>,
    cancellations: Arc<CancellationRegistry>,
    notifications: Arc<NotificationManager>,
    health: Arc<HealthMonitor>,
    resilience: Resilience,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    pending: Mutex<HashMap<RequestId, PendingReply>>,
    next_request_id: AtomicI64,
    callbacks: RwLock<Callbacks>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl McpServer {
    /// A server with the built-in methods (`ping`, resource subscriptions)
    /// already registered.
    pub fn new(config: ServerConfig) -> Self {
        let notifications = Arc::new(NotificationManager::new(config.notifications.clone()));
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let mut handlers = HandlerRegistry::new();
        handlers.register_builtins(Arc::clone(&notifications));

        Self {
            config,
            handlers,
            session: RwLock::new(Session::default()),
            cancellations: Arc::new(CancellationRegistry::new()),
            notifications,
            health,
            resilience: Resilience::new(),
            transport: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicI64::new(1),
            callbacks: RwLock::new(Callbacks::default()),
            shutdown: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // ---- registration ----

    pub fn register_request(&mut self, method: impl Into<String>, handler: impl RequestHandler + 'static) {
        self.handlers.register(method, handler);
    }

    pub fn register_cancellable(
        &mut self,
        method: impl Into<String>,
        handler: impl CancellableHandler + 'static,
    ) {
        self.handlers.register_cancellable(method, handler);
    }

    pub fn register_notification(
        &mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) {
        self.handlers.register_notification(method, handler);
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Fired once when the peer sends `notifications/initialized`.
    pub fn on_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks.write().ready.push(Arc::new(callback));
    }

    /// Fired for transport faults. The connection stays open.
    pub fn on_error(&self, callback: impl Fn(&TransportError) + Send + Sync + 'static) {
        self.callbacks.write().error.push(Arc::new(callback));
    }

    /// Fired once when the serve loop ends.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks.write().close.push(Arc::new(callback));
    }

    // ---- collaborators ----

    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    // ---- session ----

    pub fn is_initialized(&self) -> bool {
        self.session.read().initialized
    }

    pub fn is_ready(&self) -> bool {
        self.session.read().ready
    }

    /// Version negotiated during `initialize`.
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.session.read().protocol_version
    }

    pub fn peer_info(&self) -> Option<Implementation> {
        self.session.read().peer_info.clone()
    }

    pub fn peer_capabilities(&self) -> Option<Value> {
        self.session.read().peer_capabilities.clone()
    }

    /// Capabilities advertised in the `initialize` result, derived from the
    /// registered method names.
    pub fn capabilities(&self) -> ServerCapabilities {
        let names = self.handlers.methods();
        let has_prefix = |prefix: &str| names.iter().any(|m| m.starts_with(prefix));
        ServerCapabilities {
            tools: has_prefix("tools/").then_some(ListChangedCapability { list_changed: true }),
            resources: has_prefix("resources/").then(|| ResourcesCapability {
                subscribe: self.handlers.has_method(methods::RESOURCES_SUBSCRIBE),
                list_changed: true,
            }),
            prompts: has_prefix("prompts/").then_some(ListChangedCapability { list_changed: true }),
            logging: has_prefix("logging/").then(|| json!({})),
        }
    }

    // ---- dispatch ----

    /// Process one inbound message, returning the reply to send, if any.
    pub async fn handle_message(&self, message: Message) -> Option<Message> {
        match message {
            Message::Request(request) => Some(Message::Response(self.handle_request(request).await)),
            Message::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            Message::Response(response) => {
                self.route_response(response);
                None
            }
        }
    }

    /// Answer one request. Always yields exactly one response.
    pub async fn handle_request(&self, request: Request) -> Response {
        if request.method == methods::INITIALIZE {
            return self.initialize(request);
        }
        if !self.is_initialized() {
            debug!(method = %request.method, "request rejected before initialize");
            return Response::error(
                Some(request.id),
                ErrorObject::invalid_request("Server not initialized"),
            );
        }
        let Some(handler) = self.handlers.get(&request.method).cloned() else {
            debug!(method = %request.method, "method not found");
            return Response::error(Some(request.id), ErrorObject::method_not_found(&request.method));
        };

        let id = request.id.clone();
        let method = request.method.clone();
        let token = self
            .cancellations
            .register(id.clone(), json!({ "method": method }));
        let _registration = Registration {
            registry: &self.cancellations,
            id: id.clone(),
        };

        let outcome = AssertUnwindSafe(handler.invoke(request, token))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(err)) => {
                debug!(method = %method, request_id = %id, error = %err, "handler fault");
                Response::error(Some(id), err.to_error_object(&method))
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(method = %method, request_id = %id, panic = %detail, "handler panicked");
                let err = McpError::internal(format!("handler panicked: {detail}"));
                Response::error(Some(id), err.to_error_object(&method))
            }
        }
    }

    fn initialize(&self, request: Request) -> Response {
        let params: InitializeParams = match request.parse_params() {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "malformed initialize params");
                return Response::error(
                    Some(request.id),
                    ErrorObject::invalid_params(format!("Invalid initialize params: {e}")),
                );
            }
        };

        let version = {
            let mut session = self.session.write();
            if session.initialized {
                warn!("duplicate initialize rejected");
                return Response::error(
                    Some(request.id),
                    ErrorObject::invalid_request("Server already initialized"),
                );
            }
            let version = negotiate_version(&params.protocol_version);
            session.initialized = true;
            session.protocol_version = Some(version);
            session.peer_capabilities = Some(params.capabilities);
            session.peer_info = Some(params.client_info.clone());
            version
        };
        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            negotiated = version,
            "session initialized"
        );

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: self.capabilities(),
            server: Implementation {
                name: self.config.name.clone(),
                version: self.config.version.clone(),
            },
            instructions: self.config.instructions.clone(),
        };
        match serde_json::to_value(result) {
            Ok(value) => Response::success(request.id, value),
            Err(e) => Response::error(Some(request.id), ErrorObject::internal_error(e.to_string())),
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        if notification.method == methods::CANCELLED {
            self.handle_cancelled(&notification);
            return;
        }
        if !self.is_initialized() {
            debug!(method = %notification.method, "notification dropped before initialize");
            return;
        }
        if notification.method == methods::INITIALIZED {
            self.mark_ready();
        }

        let Some(handler) = self.handlers.notification(&notification.method) else {
            if notification.method != methods::INITIALIZED {
                debug!(method = %notification.method, "no handler for notification");
            }
            return;
        };
        let method = notification.method.clone();
        match AssertUnwindSafe(handler.handle(notification)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(method = %method, error = %err, "notification handler fault"),
            Err(panic) => error!(
                method = %method,
                panic = %panic_message(panic.as_ref()),
                "notification handler panicked"
            ),
        }
    }

    fn handle_cancelled(&self, notification: &Notification) {
        let params: CancelledParams = match notification
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) => {
                warn!("cancellation without params ignored");
                return;
            }
            Err(e) => {
                warn!(error = %e, "malformed cancellation ignored");
                return;
            }
        };
        if self
            .cancellations
            .cancel(&params.request_id, params.reason.as_deref())
        {
            info!(request_id = %params.request_id, reason = ?params.reason, "request cancelled by peer");
        } else {
            debug!(request_id = %params.request_id, "cancellation for unknown or finished request");
        }
    }

    fn mark_ready(&self) {
        {
            let mut session = self.session.write();
            if session.ready {
                return;
            }
            session.ready = true;
        }
        info!("peer ready");
        if self.config.health_enabled {
            self.health.start();
        }
        let callbacks = self.callbacks.read().ready.clone();
        for callback in callbacks {
            callback();
        }
    }

    /// Hand an inbound response to the health monitor or the waiting
    /// outbound request.
    fn route_response(&self, response: Response) {
        let Some(id) = response.id.clone() else {
            warn!(error = ?response.error_object(), "peer sent a response without id");
            return;
        };
        if self.health.handle_pong(&id) {
            return;
        }
        let Some(reply) = self.pending.lock().remove(&id) else {
            debug!(request_id = %id, "response matches no pending request");
            return;
        };
        let result = match response.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(McpError::Remote(error)),
        };
        // The requester may have given up; nothing to do then.
        let _ = reply.send(result);
    }

    // ---- outbound ----

    fn active_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| McpError::ConnectionClosed("no transport attached".into()))
    }

    /// Send a request to the peer and wait for its response.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let transport = self.active_transport()?;
        let id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let request = Message::Request(Request::new(id.clone(), method, params));
        if let Err(e) = transport.send(&request).await {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }
        debug!(request_id = %id, method, "request sent to peer");

        rx.await
            .map_err(|_| McpError::ConnectionClosed("connection closed before response".into()))?
    }

    /// Abandon an outbound request and tell the peer. Returns `false` if no
    /// such request was pending.
    pub async fn cancel_request(&self, id: &RequestId, reason: Option<&str>) -> bool {
        let Some(reply) = self.pending.lock().remove(id) else {
            return false;
        };
        let _ = reply.send(Err(McpError::Cancelled {
            reason: reason.map(str::to_string),
        }));

        let params = CancelledParams {
            request_id: id.clone(),
            reason: reason.map(str::to_string),
        };
        match serde_json::to_value(params) {
            Ok(params) => {
                self.notifications
                    .send(Notification::new(methods::CANCELLED, Some(params)))
                    .await
            }
            Err(e) => warn!(error = %e, "could not encode cancellation"),
        }
        true
    }

    // ---- lifecycle ----

    /// Drive `transport` until the peer closes it or [`shutdown`](Self::shutdown)
    /// is called.
    pub async fn serve(self: Arc<Self>, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        transport.start().await?;
        *self.transport.write() = Some(Arc::clone(&transport));
        self.notifications.attach_transport(Arc::clone(&transport)).await;
        self.health.attach_transport(Arc::clone(&transport));
        info!(
            session = transport.session_id().as_deref().unwrap_or("-"),
            server = %self.config.name,
            "serving"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = transport.receive() => match event {
                    TransportEvent::Message(message) => self.dispatch(message, &transport).await,
                    TransportEvent::Error(error) => self.handle_transport_error(error, &transport).await,
                    TransportEvent::Closed => {
                        info!("peer closed the connection");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.config.health_enabled && self.is_ready() {
                        self.health.tick().await;
                    }
                }
            }
        }

        self.teardown(&transport).await;
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, message: Message, transport: &Arc<dyn Transport>) {
        match message {
            // Handled inline so the handshake completes before anything after it.
            Message::Request(request) if request.method == methods::INITIALIZE => {
                let response = self.initialize(request);
                self.reply(transport, response).await;
            }
            Message::Request(request) => {
                let server = Arc::clone(self);
                let transport = Arc::clone(transport);
                tokio::spawn(async move {
                    let response = server.handle_request(request).await;
                    server.reply(&transport, response).await;
                });
            }
            Message::Notification(notification) => self.handle_notification(notification).await,
            Message::Response(response) => self.route_response(response),
        }
    }

    async fn reply(&self, transport: &Arc<dyn Transport>, response: Response) {
        if let Err(e) = transport.send(&Message::Response(response)).await {
            warn!(error = %e, "failed to send response");
            self.report_error(&e);
        }
    }

    async fn handle_transport_error(&self, error: TransportError, transport: &Arc<dyn Transport>) {
        if let TransportError::Message(message_error) = &error {
            warn!(error = %message_error, "unreadable message from peer");
            if message_error.expects_reply() {
                let reply = ErrorObject::new(message_error.error_code(), message_error.to_string());
                let id = message_error.request_id().cloned();
                self.reply(transport, Response::error(id, reply)).await;
            }
        } else {
            warn!(error = %error, "transport fault");
        }
        self.report_error(&error);
    }

    fn report_error(&self, error: &TransportError) {
        let callbacks = self.callbacks.read().error.clone();
        for callback in callbacks {
            callback(error);
        }
    }

    async fn teardown(&self, transport: &Arc<dyn Transport>) {
        let cancelled = self.cancellations.cancel_all(Some("connection closed"));
        if cancelled > 0 {
            info!(cancelled, "cancelled in-flight requests");
        }
        self.notifications.close();
        self.health.stop();
        self.health.detach_transport();
        // Dropping the senders fails every outstanding outbound request.
        self.pending.lock().clear();
        *self.transport.write() = None;
        if let Err(e) = transport.close().await {
            debug!(error = %e, "transport close failed");
        }
        info!("connection closed");

        let callbacks = self.callbacks.read().close.clone();
        for callback in callbacks {
            callback();
        }
    }

    /// Cancel active requests, drop queued notifications and stop serving.
    pub async fn shutdown(&self) {
        self.cancellations.cancel_all(Some("server shutting down"));
        self.notifications.close();
        self.health.stop();
        self.shutdown.cancel();
        let transport = self.transport.read().clone();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "transport close failed");
            }
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.config.name)
            .field("handlers", &self.handlers)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Unregisters a request from the cancellation registry however the handler exits.
struct Registration<'a> {
    registry: &'a CancellationRegistry,
    id: RequestId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
