//! Caller-selected strategies wrapped around a zero-argument operation.
//!
//! - [`retry`]: exponential backoff for retryable faults
//! - [`with_fallback`]: secondary path on any fault
//! - [`CircuitBreakers`]: per-name fault isolation with cool-down
//! - [`degrade`]: absorb faults into a degraded response
//!
//! Only the circuit breaker keeps state; it lives in a [`Resilience`] owned by
//! one server instance, never in a global.

pub mod circuit_breaker;
pub mod degradation;
pub mod fallback;
pub mod retry;

use std::future::Future;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakers, CircuitState};
pub use degradation::{degrade, Degradation};
pub use fallback::{with_fallback, FallbackOptions};
pub use retry::{retry, RetryPolicy};

use crate::error::McpError;

/// The toolkit bound to one connection's circuit state.
#[derive(Debug, Default)]
pub struct Resilience {
    breakers: CircuitBreakers,
}

impl Resilience {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub async fn retry<T, F, Fut>(&self, policy: &RetryPolicy, operation: F) -> Result<T, McpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        retry(policy, operation).await
    }

    pub async fn circuit_breaker<T, F, Fut>(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
        operation: F,
    ) -> Result<T, McpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        self.breakers.call(name, config, operation).await
    }

    pub async fn fallback<T, P, PFut, G, GFut>(
        &self,
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
        with_fallback(primary, fallback, options).await
    }

    pub async fn degrade<T, F, Fut>(&self, operation: F, degradation: Degradation<T>) -> Result<T, McpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        degrade(operation, degradation).await
    }
}
