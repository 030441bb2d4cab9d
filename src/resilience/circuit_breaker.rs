use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::McpError;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive faults that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Named circuits, created lazily on first use. One set per server instance.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` through the circuit `name`.
    ///
    /// An open circuit rejects with [`McpError::CircuitOpen`] without invoking
    /// the operation.
    pub async fn call<T, F, Fut>(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
        operation: F,
    ) -> Result<T, McpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let trial = self.admit(name, config)?;
        let mut guard = TrialGuard {
            breakers: self,
            name,
            armed: trial,
        };
        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(name, config),
            Err(_) => self.record_failure(name, config),
        }
        result
    }

    /// Current state of `name`; unknown circuits are closed.
    pub fn state(&self, name: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(name)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn consecutive_failures(&self, name: &str) -> u32 {
        self.circuits
            .lock()
            .get(name)
            .map_or(0, |c| c.consecutive_failures)
    }

    /// Force `name` back to closed with cleared counters.
    pub fn reset(&self, name: &str) {
        if self.circuits.lock().remove(name).is_some() {
            info!(circuit = name, "circuit reset");
        }
    }

    /// Decide whether a call may proceed. `Ok(true)` marks a half-open trial.
    fn admit(&self, name: &str, config: &CircuitBreakerConfig) -> Result<bool, McpError> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(name.to_string()).or_insert_with(Circuit::new);
        match circuit.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled = circuit
                    .last_failure
                    .map_or(true, |t| t.elapsed() >= config.recovery_timeout);
                if cooled {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.consecutive_successes = 0;
                    circuit.trial_in_flight = true;
                    info!(circuit = name, "circuit half-open, allowing trial call");
                    Ok(true)
                } else {
                    debug!(circuit = name, "call rejected, circuit open");
                    Err(McpError::CircuitOpen(name.to_string()))
                }
            }
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    Err(McpError::CircuitOpen(name.to_string()))
                } else {
                    circuit.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, name: &str, config: &CircuitBreakerConfig) {
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(name) else {
            return;
        };
        match circuit.state {
            CircuitState::Closed => circuit.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                circuit.trial_in_flight = false;
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= config.success_threshold {
                    *circuit = Circuit::new();
                    info!(circuit = name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, name: &str, config: &CircuitBreakerConfig) {
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(name) else {
            return;
        };
        circuit.consecutive_failures += 1;
        circuit.last_failure = Some(Instant::now());
        match circuit.state {
            CircuitState::Closed if circuit.consecutive_failures >= config.failure_threshold => {
                circuit.state = CircuitState::Open;
                warn!(
                    circuit = name,
                    failures = circuit.consecutive_failures,
                    recovery_secs = config.recovery_timeout.as_secs(),
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.consecutive_successes = 0;
                circuit.trial_in_flight = false;
                warn!(circuit = name, "trial call failed, circuit re-opened");
            }
            _ => {}
        }
    }
}

/// Releases the half-open trial slot if the call future is dropped mid-flight.
struct TrialGuard<'a> {
    breakers: &'a CircuitBreakers,
    name: &'a str,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(circuit) = self.breakers.circuits.lock().get_mut(self.name) {
                circuit.trial_in_flight = false;
            }
        }
    }
}
