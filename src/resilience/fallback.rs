use std::future::Future;

use tracing::{debug, warn};

use crate::error::McpError;

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackOptions {
    /// When the fallback also fails, return its fault instead of the primary's.
    pub propagate_fallback_error: bool,
}

/// Run `primary`; on any fault run `fallback` with that fault.
pub async fn with_fallback<T, P, PFut, G, GFut>(
    primary: P,
    fallback: G,
    options: FallbackOptions,
) -> Result<T, McpError>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, McpError>>,
    G: FnOnce(McpError) -> GFut,
    GFut: Future<Output = Result<T, McpError>>,
{
    let primary_err = match primary().await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    debug!(error = %primary_err, "primary failed, running fallback");

    match fallback(primary_err.clone()).await {
        Ok(value) => Ok(value),
        Err(fallback_err) => {
            warn!(primary = %primary_err, fallback = %fallback_err, "fallback failed");
            if options.propagate_fallback_error {
                Err(fallback_err)
            } else {
                Err(primary_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let result = with_fallback(
            || async { Ok::<_, McpError>(1) },
            |_| async { Err(McpError::internal("fallback must not run")) },
            FallbackOptions::default(),
        )
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn fallback_receives_primary_fault() {
        let result = with_fallback(
            || async { Err::<String, _>(McpError::Resource("disk".into())) },
            |err| async move { Ok(format!("cached after {}", err.kind())) },
            FallbackOptions::default(),
        )
        .await;
        assert_eq!(result.unwrap(), "cached after resource");
    }

    #[tokio::test]
    async fn double_failure_reraises_primary_by_default() {
        let result: Result<(), _> = with_fallback(
            || async { Err(McpError::Resource("primary".into())) },
            |_| async { Err(McpError::Resource("fallback".into())) },
            FallbackOptions::default(),
        )
        .await;
        assert_eq!(result.unwrap_err(), McpError::Resource("primary".into()));
    }

    #[tokio::test]
    async fn double_failure_can_reraise_fallback() {
        let result: Result<(), _> = with_fallback(
            || async { Err(McpError::Resource("primary".into())) },
            |_| async { Err(McpError::Resource("fallback".into())) },
            FallbackOptions {
                propagate_fallback_error: true,
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), McpError::Resource("fallback".into()));
    }
}
