//! Rotation lifecycle events and metrics.
//!
//! Delivery is best-effort and never blocks the pipeline: each sink gets a
//! bounded queue drained by its own task, and events that would block are
//! dropped with a per-sink counter increment.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::RotationStatusKind;

/// Queue depth per sink before events start dropping.
const SINK_QUEUE_CAPACITY: usize = 64;

/// Lifecycle points the engine announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventType {
    /// Rotation began.
    Started,
    /// Rotation finished successfully.
    Completed,
    /// Rotation finished in failure.
    Failed,
}

/// One structured rotation-lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    /// Which lifecycle point.
    pub event_type: RotationEventType,
    /// Service instance name.
    pub service: String,
    /// Environment tag, when the request carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Strategy in use.
    pub strategy: String,
    /// Final status, for terminal events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RotationStatusKind>,
    /// Wall-clock duration, for terminal events.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Version being replaced, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Replacement version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    /// Who initiated the rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    /// Failure description, for failed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub metadata: std::collections::BTreeMap<String, String>,
}

/// Receives rotation events. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Sink name, for drop counters and logs.
    fn name(&self) -> &str;

    /// Handle one event.
    fn deliver(&self, event: &RotationEvent);
}

struct SinkHandle {
    name: String,
    tx: mpsc::Sender<RotationEvent>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out bus over zero or more sinks.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<SinkHandle>,
}

impl EventBus {
    /// A bus with no sinks (emitting is a no-op).
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink, spawning its drain task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        let (tx, mut rx) = mpsc::channel::<RotationEvent>(SINK_QUEUE_CAPACITY);
        let name = sink.name().to_string();
        let dropped = Arc::new(AtomicU64::new(0));
        self.sinks.push(SinkHandle {
            name,
            tx,
            dropped: Arc::clone(&dropped),
        });
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.deliver(&event);
            }
        });
    }

    /// Emit to every sink without blocking; saturated sinks drop the event.
    pub fn emit(&self, event: &RotationEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.tx.try_send(event.clone()) {
                sink.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sink = %sink.name,
                    service = %event.service,
                    reason = %err,
                    "dropped rotation event"
                );
            }
        }
    }

    /// Events dropped for a sink so far.
    pub fn dropped(&self, sink_name: &str) -> u64 {
        self.sinks
            .iter()
            .find(|s| s.name == sink_name)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Records rotation metrics.
pub trait MetricsRecorder: Send + Sync {
    /// `rotations_started{service,env,strategy}`.
    fn rotation_started(&self, service_type: &str, environment: &str, strategy: &str);

    /// `rotations_completed{service,env,status}` plus a duration observation.
    fn rotation_completed(
        &self,
        service_type: &str,
        environment: &str,
        status: RotationStatusKind,
        duration: Duration,
    );
}

/// Default recorder: structured tracing events, scrape-friendly field names.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    fn rotation_started(&self, service_type: &str, environment: &str, strategy: &str) {
        tracing::info!(
            metric = "rotations_started",
            service = service_type,
            env = environment,
            strategy,
            "rotation started"
        );
    }

    fn rotation_completed(
        &self,
        service_type: &str,
        environment: &str,
        status: RotationStatusKind,
        duration: Duration,
    ) {
        tracing::info!(
            metric = "rotations_completed",
            service = service_type,
            env = environment,
            status = ?status,
            duration_ms = duration.as_millis() as u64,
            "rotation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectingSink {
        name: String,
        seen: Mutex<Vec<RotationEvent>>,
    }

    impl EventSink for CollectingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn deliver(&self, event: &RotationEvent) {
            self.seen.lock().push(event.clone());
        }
    }

    fn event(service: &str) -> RotationEvent {
        RotationEvent {
            event_type: RotationEventType::Started,
            service: service.into(),
            environment: None,
            strategy: "immediate".into(),
            status: None,
            duration: None,
            timestamp: Utc::now(),
            previous_version: None,
            new_version: None,
            initiated_by: None,
            error: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribed_sinks() {
        let sink = Arc::new(CollectingSink {
            name: "test".into(),
            seen: Mutex::new(Vec::new()),
        });
        let mut bus = EventBus::new();
        bus.subscribe(Arc::clone(&sink) as Arc<dyn EventSink>);

        bus.emit(&event("prod-db"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].service, "prod-db");
    }

    #[tokio::test]
    async fn saturated_sink_drops_with_counter_instead_of_blocking() {
        // A sink whose drain task never gets a chance to run inside this
        // single burst: the queue fills, the rest drop.
        let sink = Arc::new(CollectingSink {
            name: "slow".into(),
            seen: Mutex::new(Vec::new()),
        });
        let mut bus = EventBus::new();
        bus.subscribe(sink as Arc<dyn EventSink>);

        for i in 0..(SINK_QUEUE_CAPACITY + 10) {
            bus.emit(&event(&format!("svc-{i}")));
        }
        assert!(bus.dropped("slow") >= 1, "overflow must drop, not block");
    }

    #[tokio::test]
    async fn emitting_with_no_sinks_is_a_noop() {
        let bus = EventBus::new();
        bus.emit(&event("prod-db"));
        assert_eq!(bus.dropped("anything"), 0);
    }
}
