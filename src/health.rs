//! Active ping/pong heartbeat for one connection.
//!
//! The monitor has no scheduler of its own: the host loop calls
//! [`HealthMonitor::tick`] periodically and routes inbound responses through
//! [`HealthMonitor::handle_pong`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{methods, Message, Request, RequestId};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_failed_pings: u32,
    /// Number of round-trip samples kept for the rolling average.
    pub sample_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_failed_pings: 3,
            sample_window: 10,
        }
    }
}

/// Transitions reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Connection recovered after being unhealthy.
    Healthy,
    /// Failure threshold reached. Fired once per transition.
    Unhealthy,
    /// A single ping went unanswered (or could not be sent).
    Timeout { consecutive_failures: u32 },
}

/// Point-in-time view of the health record.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_ping_sent: Option<Instant>,
    pub last_pong_received: Option<Instant>,
    pub outstanding_ping: Option<RequestId>,
    pub average_response_time: Option<Duration>,
}

struct OutstandingPing {
    id: RequestId,
    sent_at: Instant,
}

struct HealthRecord {
    healthy: bool,
    running: bool,
    consecutive_failures: u32,
    last_ping_sent: Option<Instant>,
    last_pong_received: Option<Instant>,
    outstanding: Option<OutstandingPing>,
    samples: VecDeque<Duration>,
}

pub type HealthListener = Arc<dyn Fn(&HealthEvent) + Send + Sync>;

pub struct HealthMonitor {
    config: HealthConfig,
    record: Mutex<HealthRecord>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    listeners: RwLock<Vec<HealthListener>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            record: Mutex::new(HealthRecord {
                healthy: true,
                running: false,
                consecutive_failures: 0,
                last_ping_sent: None,
                last_pong_received: None,
                outstanding: None,
                samples: VecDeque::new(),
            }),
            transport: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn detach_transport(&self) {
        *self.transport.write() = None;
    }

    pub fn on_event(&self, listener: impl Fn(&HealthEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Begin heartbeating on subsequent ticks.
    pub fn start(&self) {
        let mut record = self.record.lock();
        if !record.running {
            record.running = true;
            info!(
                interval_secs = self.config.ping_interval.as_secs(),
                timeout_secs = self.config.ping_timeout.as_secs(),
                "health monitor started"
            );
        }
    }

    /// Stop heartbeating and forget any outstanding ping.
    pub fn stop(&self) {
        let mut record = self.record.lock();
        record.running = false;
        record.outstanding = None;
    }

    pub fn is_running(&self) -> bool {
        self.record.lock().running
    }

    pub fn is_healthy(&self) -> bool {
        self.record.lock().healthy
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let record = self.record.lock();
        let average_response_time = if record.samples.is_empty() {
            None
        } else {
            let total: Duration = record.samples.iter().sum();
            Some(total / record.samples.len() as u32)
        };
        HealthSnapshot {
            healthy: record.healthy,
            consecutive_failures: record.consecutive_failures,
            last_ping_sent: record.last_ping_sent,
            last_pong_received: record.last_pong_received,
            outstanding_ping: record.outstanding.as_ref().map(|p| p.id.clone()),
            average_response_time,
        }
    }

    /// Advance the heartbeat: expire an overdue ping, or send a new one when
    /// the interval has elapsed. No-op while stopped.
    pub async fn tick(&self) {
        let now = Instant::now();
        let mut events = Vec::new();

        let ping = {
            let mut record = self.record.lock();
            if !record.running {
                return;
            }

            if let Some(outstanding) = &record.outstanding {
                if now.duration_since(outstanding.sent_at) < self.config.ping_timeout {
                    return;
                }
                warn!(ping_id = %outstanding.id, "ping timed out");
                record.outstanding = None;
                self.record_failure(&mut record, &mut events);
            }

            let due = record
                .last_ping_sent
                .map_or(true, |sent| now.duration_since(sent) >= self.config.ping_interval);
            if due {
                let id = RequestId::Str(format!("ping-{}", uuid::Uuid::now_v7()));
                record.last_ping_sent = Some(now);
                record.outstanding = Some(OutstandingPing {
                    id: id.clone(),
                    sent_at: now,
                });
                Some(id)
            } else {
                None
            }
        };

        if let Some(id) = ping {
            let transport = self.transport.read().clone();
            let sent = match transport {
                Some(transport) => transport
                    .send(&Message::Request(Request::new(id.clone(), methods::PING, None)))
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("no transport attached".to_string()),
            };
            if let Err(error) = sent {
                warn!(ping_id = %id, error, "ping could not be sent");
                let mut record = self.record.lock();
                if record.outstanding.as_ref().is_some_and(|p| p.id == id) {
                    record.outstanding = None;
                    self.record_failure(&mut record, &mut events);
                }
            } else {
                debug!(ping_id = %id, "ping sent");
            }
        }

        self.emit(events);
    }

    /// Record a response to one of our pings. Returns `false` if `id` is not
    /// the outstanding ping (so the caller can route it elsewhere).
    pub fn handle_pong(&self, id: &RequestId) -> bool {
        let now = Instant::now();
        let mut events = Vec::new();
        {
            let mut record = self.record.lock();
            let matches = record.outstanding.as_ref().is_some_and(|p| &p.id == id);
            if !matches {
                return false;
            }
            let Some(ping) = record.outstanding.take() else {
                return false;
            };

            let rtt = now.duration_since(ping.sent_at);
            record.samples.push_back(rtt);
            while record.samples.len() > self.config.sample_window.max(1) {
                record.samples.pop_front();
            }
            record.last_pong_received = Some(now);
            record.consecutive_failures = 0;
            debug!(ping_id = %id, rtt_ms = rtt.as_millis() as u64, "pong received");

            if !record.healthy {
                record.healthy = true;
                info!("connection healthy again");
                events.push(HealthEvent::Healthy);
            }
        }
        self.emit(events);
        true
    }

    fn record_failure(&self, record: &mut HealthRecord, events: &mut Vec<HealthEvent>) {
        record.consecutive_failures += 1;
        events.push(HealthEvent::Timeout {
            consecutive_failures: record.consecutive_failures,
        });
        if record.healthy && record.consecutive_failures >= self.config.max_failed_pings {
            record.healthy = false;
            warn!(failures = record.consecutive_failures, "connection unhealthy");
            events.push(HealthEvent::Unhealthy);
        }
    }

    fn emit(&self, events: Vec<HealthEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TransportEvent};

    fn fast_config() -> HealthConfig {
        HealthConfig {
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(2),
            max_failed_pings: 3,
            sample_window: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_sends_nothing() {
        let (ours, theirs) = MemoryTransport::pair();
        let monitor = HealthMonitor::new(fast_config());
        monitor.attach_transport(Arc::new(ours));
        monitor.tick().await;
        assert!(monitor.snapshot().last_ping_sent.is_none());
        drop(monitor);
        assert_eq!(theirs.receive().await, TransportEvent::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_sends_ping_and_pong_records_rtt() {
        let (ours, theirs) = MemoryTransport::pair();
        let monitor = HealthMonitor::new(fast_config());
        monitor.attach_transport(Arc::new(ours));
        monitor.start();

        monitor.tick().await;
        let TransportEvent::Message(Message::Request(ping)) = theirs.receive().await else {
            panic!("expected ping request");
        };
        assert_eq!(ping.method, "ping");

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(monitor.handle_pong(&ping.id));
        let snap = monitor.snapshot();
        assert_eq!(snap.average_response_time, Some(Duration::from_millis(250)));
        assert!(snap.outstanding_ping.is_none());
        assert!(!monitor.handle_pong(&ping.id));
    }

    #[tokio::test(start_paused = true)]
    async fn sample_window_is_bounded() {
        let (ours, _theirs) = MemoryTransport::pair();
        let monitor = HealthMonitor::new(fast_config());
        monitor.attach_transport(Arc::new(ours));
        monitor.start();

        for rtt_ms in [100, 300, 500] {
            monitor.tick().await;
            let id = monitor.snapshot().outstanding_ping.expect("ping outstanding");
            tokio::time::advance(Duration::from_millis(rtt_ms)).await;
            assert!(monitor.handle_pong(&id));
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        // Window of 2 keeps the last two samples only.
        assert_eq!(monitor.snapshot().average_response_time, Some(Duration::from_millis(400)));
    }

    #[tokio::test(start_paused = true)]
    async fn unsendable_ping_counts_as_failure() {
        let monitor = HealthMonitor::new(fast_config());
        monitor.start();
        monitor.tick().await;
        assert_eq!(monitor.snapshot().consecutive_failures, 1);
        assert!(monitor.snapshot().outstanding_ping.is_none());
    }
}
