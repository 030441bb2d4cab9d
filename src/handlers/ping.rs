use async_trait::async_trait;
use serde_json::json;

use super::{HandlerResult, RequestHandler};
use crate::protocol::Request;

/// `ping`: empty result, used by either side as a liveness probe.
pub struct Ping;

#[async_trait]
impl RequestHandler for Ping {
    async fn handle(&self, _request: Request) -> HandlerResult {
        Ok(json!({}))
    }
}
