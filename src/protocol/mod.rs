pub mod error;
pub mod initialize;
pub mod message;

pub use error::{ErrorCode, ErrorObject};
pub use initialize::{
    negotiate_version, CancelledParams, Implementation, InitializeParams, InitializeResult,
    ListChangedCapability, ResourcesCapability, ServerCapabilities, SubscribeParams,
    LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use message::{Message, Notification, Request, RequestId, Response, ResponseOutcome, JSONRPC_VERSION};

/// Method names the runtime itself understands.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const RESOURCE_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const RESOURCE_UPDATED: &str = "notifications/resources/updated";
    pub const TOOL_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const PROMPT_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const LOG_MESSAGE: &str = "notifications/message";
    pub const PROGRESS: &str = "notifications/progress";
}
