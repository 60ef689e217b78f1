//! Bounded per-series ring buffer (§4.3).
//!
//! One [`SampleRing`] exists per `(member, series)`. Insert is O(1);
//! eviction enforces both a time bound (`retention_hours`) and a count
//! bound derived from the global memory budget. The ring tracks its own
//! approximate byte footprint so the store's memory accountant can sum
//! across all members without re-walking every buffer.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use uplinkd_common::Sample;

/// Approximate heap footprint of one stored `Sample`, used by the global
/// memory accountant. Deliberately coarse — exactness isn't required, only
/// a stable over-estimate so `max_ram_mb` is never silently exceeded.
const APPROX_BYTES_PER_SAMPLE: usize = 256;

/// A time- and count-bounded ring buffer of samples for one series.
pub struct SampleRing {
    samples: VecDeque<Sample>,
    retention: Duration,
    max_len: usize,
}

impl SampleRing {
    pub fn new(retention_hours: u64, max_len: usize) -> Self {
        SampleRing {
            samples: VecDeque::new(),
            retention: Duration::hours(retention_hours as i64),
            max_len: max_len.max(1),
        }
    }

    /// Appends a sample, evicting the oldest entries that fall outside the
    /// retention window or exceed the count bound.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        self.evict_expired(Utc::now());
        while self.samples.len() > self.max_len {
            self.samples.pop_front();
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drops the oldest `count` samples regardless of age, used by the
    /// global memory accountant when `max_ram_mb` is exceeded across all
    /// members (§4.3).
    pub fn evict_oldest(&mut self, count: usize) -> usize {
        let n = count.min(self.samples.len());
        for _ in 0..n {
            self.samples.pop_front();
        }
        n
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns up to the last `n` samples, oldest-first, suitable as a
    /// scoring window.
    pub fn window(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Entries newer than `since`, oldest-first — backs the `history` RPC.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn approx_bytes(&self) -> usize {
        self.samples.len() * APPROX_BYTES_PER_SAMPLE
    }
}
