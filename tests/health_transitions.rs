//! Heartbeat health transitions driven by explicit ticks on a paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use common::RecordingTransport;
use mcp_runtime::health::{HealthConfig, HealthEvent, HealthMonitor};
use mcp_runtime::protocol::Message;

fn config() -> HealthConfig {
    HealthConfig {
        ping_interval: Duration::from_secs(10),
        ping_timeout: Duration::from_secs(4),
        max_failed_pings: 3,
        sample_window: 10,
    }
}

fn monitor_with_events() -> (HealthMonitor, Arc<Mutex<Vec<HealthEvent>>>) {
    let monitor = HealthMonitor::new(config());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    monitor.on_event(move |event| sink.lock().push(event.clone()));
    (monitor, events)
}

fn count(events: &Mutex<Vec<HealthEvent>>, wanted: &HealthEvent) -> usize {
    events.lock().iter().filter(|e| *e == wanted).count()
}

/// One heartbeat period: the previous ping (if any) expires and a new one
/// goes out.
async fn period(monitor: &HealthMonitor) {
    tokio::time::advance(Duration::from_secs(10)).await;
    monitor.tick().await;
}

#[tokio::test(start_paused = true)]
async fn three_missed_pings_flip_unhealthy_once_and_pong_recovers() {
    let transport = RecordingTransport::new();
    let (monitor, events) = monitor_with_events();
    monitor.attach_transport(transport.clone());
    monitor.start();

    monitor.tick().await;
    assert_eq!(transport.sent_methods(), vec!["ping"]);

    period(&monitor).await;
    period(&monitor).await;
    assert!(monitor.is_healthy());
    period(&monitor).await;
    assert!(!monitor.is_healthy());
    assert_eq!(count(&events, &HealthEvent::Unhealthy), 1);

    // Further misses do not re-announce.
    period(&monitor).await;
    period(&monitor).await;
    assert_eq!(count(&events, &HealthEvent::Unhealthy), 1);
    assert_eq!(
        count(&events, &HealthEvent::Timeout { consecutive_failures: 5 }),
        1
    );

    let Some(Message::Request(latest)) = transport.sent().last().cloned() else {
        panic!("expected a ping request");
    };
    tokio::time::advance(Duration::from_millis(120)).await;
    assert!(monitor.handle_pong(&latest.id));

    assert!(monitor.is_healthy());
    assert_eq!(count(&events, &HealthEvent::Healthy), 1);
    assert_eq!(monitor.snapshot().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_connection_healthy() {
    let transport = RecordingTransport::new();
    let (monitor, events) = monitor_with_events();
    monitor.attach_transport(transport.clone());
    monitor.start();

    for _ in 0..5 {
        monitor.tick().await;
        let id = monitor.snapshot().outstanding_ping.expect("ping outstanding");
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(monitor.handle_pong(&id));
        tokio::time::advance(Duration::from_secs(10)).await;
    }

    assert!(monitor.is_healthy());
    assert!(events.lock().is_empty());
    assert_eq!(transport.sent_methods().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn tick_before_timeout_leaves_ping_outstanding() {
    let transport = RecordingTransport::new();
    let (monitor, events) = monitor_with_events();
    monitor.attach_transport(transport.clone());
    monitor.start();

    monitor.tick().await;
    tokio::time::advance(Duration::from_secs(3)).await;
    monitor.tick().await;

    assert!(monitor.snapshot().outstanding_ping.is_some());
    assert_eq!(transport.sent_methods().len(), 1);
    assert!(events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_sends_count_towards_unhealthy() {
    let transport = RecordingTransport::new();
    transport.fail_always(true);
    let (monitor, events) = monitor_with_events();
    monitor.attach_transport(transport.clone());
    monitor.start();

    monitor.tick().await;
    period(&monitor).await;
    period(&monitor).await;

    assert!(!monitor.is_healthy());
    assert_eq!(count(&events, &HealthEvent::Unhealthy), 1);
}
