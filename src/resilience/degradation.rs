use std::future::Future;

use tracing::warn;

use crate::error::McpError;

/// What to hand back when the operation fails.
pub enum Degradation<T> {
    /// A fixed stand-in value.
    Value(T),
    /// Compute a stand-in from the fault.
    Handler(Box<dyn FnOnce(&McpError) -> Result<T, McpError> + Send>),
    /// No stand-in; report a generic "service degraded" error.
    Unavailable,
}

impl<T> Degradation<T> {
    pub fn handler(f: impl FnOnce(&McpError) -> Result<T, McpError> + Send + 'static) -> Self {
        Self::Handler(Box::new(f))
    }
}

/// Run `operation`, absorbing any fault into the degraded response.
///
/// The only error this returns is [`McpError::ServiceDegraded`].
pub async fn degrade<T, F, Fut>(operation: F, degradation: Degradation<T>) -> Result<T, McpError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, McpError>>,
{
    let err = match operation().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    warn!(error = %err, "operation failed, serving degraded response");

    match degradation {
        Degradation::Value(value) => Ok(value),
        Degradation::Handler(handler) => handler(&err)
            .map_err(|handler_err| McpError::ServiceDegraded(format!("{err}; degraded handler failed: {handler_err}"))),
        Degradation::Unavailable => Err(McpError::ServiceDegraded(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    async fn broken() -> Result<Vec<String>, McpError> {
        Err(McpError::Tool("index offline".into()))
    }

    #[tokio::test]
    async fn returns_degraded_value() {
        let out = degrade(broken, Degradation::Value(vec!["cached".into()])).await;
        assert_eq!(out.unwrap(), vec!["cached".to_string()]);
    }

    #[tokio::test]
    async fn handler_sees_the_fault() {
        let out = degrade(broken, Degradation::handler(|e| Ok(vec![e.kind().to_string()]))).await;
        assert_eq!(out.unwrap(), vec!["tool".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_becomes_service_degraded() {
        let err = degrade(broken, Degradation::Unavailable).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ServiceDegraded);
    }

    #[tokio::test]
    async fn failing_handler_becomes_service_degraded() {
        let err = degrade(broken, Degradation::handler(|_| Err(McpError::internal("nope"))))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServiceDegraded(_)));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let out = degrade(|| async { Ok(1) }, Degradation::Unavailable).await;
        assert_eq!(out.unwrap(), 1);
    }
}
