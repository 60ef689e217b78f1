//! The telemetry store: the sole mutable shared structure in the daemon
//! (§4.3, §5). One writer per series (the collection scheduler), many
//! concurrent readers (RPC, decision engine). Keyed by member name, with a
//! `DashMap` the way the control-plane's `AppState` keys agent handles —
//! each entry locks independently so readers of member A never contend
//! with a writer for member B.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uplinkd_common::{Event, EventType, Sample};

use super::ring::SampleRing;

const DEFAULT_EVENT_CAPACITY: usize = 4096;
const DEFAULT_SERIES_CAPACITY: usize = 2048;

/// Shared telemetry state for every known member plus the global event
/// log. Cheap to clone (wraps an `Arc` internally via `DashMap`'s own
/// sharding); pass by reference or clone the `Arc` around it instead.
pub struct TelemetryStore {
    series: DashMap<String, RwLock<SampleRing>>,
    events: RwLock<VecDeque<Event>>,
    event_capacity: usize,
    retention_hours: RwLock<u64>,
    total_bytes: AtomicU64,
}

impl TelemetryStore {
    pub fn new(retention_hours: u64) -> Self {
        TelemetryStore {
            series: DashMap::new(),
            events: RwLock::new(VecDeque::with_capacity(DEFAULT_EVENT_CAPACITY)),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            retention_hours: RwLock::new(retention_hours),
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Updates the retention window applied to newly-created series rings.
    /// Existing rings keep their retention until they are recreated by
    /// discovery; this mirrors the config snapshot's "readers take a local
    /// copy for the duration of one tick" rule (§5).
    pub fn set_retention_hours(&self, hours: u64) {
        *self.retention_hours.write().unwrap() = hours;
    }

    fn retention_hours(&self) -> u64 {
        *self.retention_hours.read().unwrap()
    }

    /// Records a new sample for `member`, creating its ring on first use.
    pub fn insert_sample(&self, member: &str, sample: Sample) {
        let ring = self
            .series
            .entry(member.to_string())
            .or_insert_with(|| RwLock::new(SampleRing::new(self.retention_hours(), DEFAULT_SERIES_CAPACITY)));
        ring.write().unwrap().push(sample);
        self.recompute_total_bytes();
    }

    /// Drops a member's series entirely (discovery removed it).
    pub fn remove_member(&self, member: &str) {
        self.series.remove(member);
        self.recompute_total_bytes();
    }

    /// Returns up to the last `n` samples for `member`, oldest-first.
    pub fn window(&self, member: &str, n: usize) -> Vec<Sample> {
        self.series
            .get(member)
            .map(|ring| ring.read().unwrap().window(n))
            .unwrap_or_default()
    }

    pub fn latest(&self, member: &str) -> Option<Sample> {
        self.series
            .get(member)
            .and_then(|ring| ring.read().unwrap().latest().cloned())
    }

    /// Snapshot of the latest sample for every known member.
    pub fn all_latest(&self) -> Vec<(String, Sample)> {
        self.series
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .read()
                    .unwrap()
                    .latest()
                    .cloned()
                    .map(|s| (entry.key().clone(), s))
            })
            .collect()
    }

    /// History for one member, optionally bounded by age and count —
    /// backs the `history` RPC method.
    pub fn history(&self, member: &str, hours: Option<f64>, limit: Option<usize>) -> Vec<Sample> {
        let Some(ring) = self.series.get(member) else {
            return Vec::new();
        };
        let ring = ring.read().unwrap();
        let mut entries = match hours {
            Some(h) => ring.since(Utc::now() - Duration::milliseconds((h * 3_600_000.0) as i64)),
            None => ring.window(usize::MAX),
        };
        if let Some(limit) = limit {
            if entries.len() > limit {
                let skip = entries.len() - limit;
                entries = entries.split_off(skip);
            }
        }
        entries
    }

    /// Appends an event to the global ring, evicting the oldest entry if
    /// the configured capacity is exceeded.
    pub fn push_event(&self, event: Event) {
        let mut events = self.events.write().unwrap();
        events.push_back(event);
        while events.len() > self.event_capacity {
            events.pop_front();
        }
    }

    /// Recent events, newest-last, optionally filtered by type and age —
    /// backs the `events` RPC method.
    pub fn recent_events(
        &self,
        limit: Option<usize>,
        hours: Option<f64>,
        event_type: Option<EventType>,
    ) -> Vec<Event> {
        let events = self.events.read().unwrap();
        let cutoff = hours.map(|h| Utc::now() - Duration::milliseconds((h * 3_600_000.0) as i64));
        let mut filtered: Vec<Event> = events
            .iter()
            .filter(|e| cutoff.map(|c| e.timestamp >= c).unwrap_or(true))
            .filter(|e| event_type.map(|t| e.event_type == t).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if filtered.len() > limit {
                let skip = filtered.len() - limit;
                filtered = filtered.split_off(skip);
            }
        }
        filtered
    }

    fn recompute_total_bytes(&self) {
        let total: u64 = self
            .series
            .iter()
            .map(|entry| entry.value().read().unwrap().approx_bytes() as u64)
            .sum();
        self.total_bytes.store(total, Ordering::Relaxed);
    }

    pub fn approx_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Global memory accountant (§4.3): if total usage exceeds
    /// `max_ram_mb`, evicts the oldest samples across all members,
    /// round-robin, until back under budget or every series is empty.
    /// Returns the number of samples evicted.
    pub fn enforce_memory_budget(&self, max_ram_mb: u64) -> u64 {
        let budget_bytes = max_ram_mb * 1024 * 1024;
        let mut evicted = 0u64;
        loop {
            self.recompute_total_bytes();
            if self.approx_bytes() <= budget_bytes {
                break;
            }
            let mut any_evicted = false;
            for entry in self.series.iter() {
                let mut ring = entry.value().write().unwrap();
                if ring.evict_oldest(1) > 0 {
                    evicted += 1;
                    any_evicted = true;
                }
            }
            if !any_evicted {
                break;
            }
        }
        self.recompute_total_bytes();
        evicted
    }

    pub fn known_members(&self) -> Vec<String> {
        self.series.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_common::ClassSample;

    fn sample() -> Sample {
        Sample::connected_ok(20.0, 0.0, 1.0, ClassSample::Generic)
    }

    #[test]
    fn insert_and_read_latest() {
        let store = TelemetryStore::new(24);
        store.insert_sample("wan0", sample());
        assert!(store.latest("wan0").is_some());
        assert!(store.latest("wan1").is_none());
    }

    #[test]
    fn window_respects_size() {
        let store = TelemetryStore::new(24);
        for _ in 0..10 {
            store.insert_sample("wan0", sample());
        }
        assert_eq!(store.window("wan0", 3).len(), 3);
    }

    #[test]
    fn remove_member_drops_series() {
        let store = TelemetryStore::new(24);
        store.insert_sample("wan0", sample());
        store.remove_member("wan0");
        assert!(store.latest("wan0").is_none());
    }

    #[test]
    fn event_log_evicts_oldest_beyond_capacity() {
        let store = TelemetryStore::new(24);
        for i in 0..5 {
            store.push_event(Event::new(EventType::Sample, format!("tick {i}")));
        }
        let events = store.recent_events(None, None, None);
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn recent_events_filters_by_type() {
        let store = TelemetryStore::new(24);
        store.push_event(Event::new(EventType::Switch, "switch"));
        store.push_event(Event::new(EventType::Error, "error"));
        let switches = store.recent_events(None, None, Some(EventType::Switch));
        assert_eq!(switches.len(), 1);
    }

    #[test]
    fn memory_budget_evicts_across_members() {
        let store = TelemetryStore::new(24);
        for _ in 0..1000 {
            store.insert_sample("wan0", sample());
            store.insert_sample("wan1", sample());
        }
        let evicted = store.enforce_memory_budget(0);
        assert!(evicted > 0);
        assert_eq!(store.approx_bytes(), 0);
    }

    #[test]
    fn known_members_reflects_inserts() {
        let store = TelemetryStore::new(24);
        store.insert_sample("wan0", sample());
        store.insert_sample("wan1", sample());
        let mut members = store.known_members();
        members.sort();
        assert_eq!(members, vec!["wan0".to_string(), "wan1".to_string()]);
    }
}
