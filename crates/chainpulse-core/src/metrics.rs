//! Pipeline health counters.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_events: u64,
    /// Events ingested during the last full tick interval.
    pub events_per_second: u64,
    pub error_count: u64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    total_events: u64,
    events_per_second: u64,
    error_count: u64,
    last_event_time: Option<DateTime<Utc>>,
    total_at_last_tick: u64,
}

/// Shared, thread-safe pipeline counters.
///
/// Written by the ingestion pipeline, sampled by the metrics ticker and the
/// status endpoint.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    inner: Mutex<Counters>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one persisted event.
    pub fn record_event(&self, at: DateTime<Utc>) {
        let mut c = self.inner.lock().unwrap();
        c.total_events += 1;
        c.last_event_time = Some(at);
    }

    /// Count one persistence failure.
    pub fn record_error(&self) {
        self.inner.lock().unwrap().error_count += 1;
    }

    pub fn total_events(&self) -> u64 {
        self.inner.lock().unwrap().total_events
    }

    pub fn error_count(&self) -> u64 {
        self.inner.lock().unwrap().error_count
    }

    /// Close a tick interval: the rate becomes the number of events counted
    /// since the previous tick.
    pub fn tick(&self) -> MetricsSnapshot {
        let mut c = self.inner.lock().unwrap();
        c.events_per_second = c.total_events - c.total_at_last_tick;
        c.total_at_last_tick = c.total_events;
        snapshot_of(&c)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        snapshot_of(&self.inner.lock().unwrap())
    }
}

fn snapshot_of(c: &Counters) -> MetricsSnapshot {
    MetricsSnapshot {
        total_events: c.total_events,
        events_per_second: c.events_per_second,
        error_count: c.error_count,
        last_event_time: c.last_event_time,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_delta_since_previous_tick() {
        let m = PipelineMetrics::new();
        for _ in 0..3 {
            m.record_event(Utc::now());
        }
        assert_eq!(m.tick().events_per_second, 3);

        m.record_event(Utc::now());
        let snap = m.tick();
        assert_eq!(snap.events_per_second, 1);
        assert_eq!(snap.total_events, 4);

        assert_eq!(m.tick().events_per_second, 0);
    }

    #[test]
    fn errors_and_last_event_time() {
        let m = PipelineMetrics::new();
        assert!(m.snapshot().last_event_time.is_none());
        m.record_error();
        m.record_error();
        let at = Utc::now();
        m.record_event(at);
        let snap = m.snapshot();
        assert_eq!(snap.error_count, 2);
        assert_eq!(snap.last_event_time, Some(at));
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(PipelineMetrics::new().snapshot()).unwrap();
        assert_eq!(json["totalEvents"], 0);
        assert_eq!(json["eventsPerSecond"], 0);
        assert!(json["lastEventTime"].is_null());
    }
}
