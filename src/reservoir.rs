// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded event reservoir: uniform reservoir sampling over a stream of
//! opaque JSON-serializable events, with a merge-on-failure retry policy.
//!
//! Grounded on `examples/original_source/src/newrelic/analytics_events.go`:
//! events carry a uniform random "priority" stamp assigned once at
//! insertion; once the reservoir is full, an incoming event is admitted
//! only if its stamp beats the current minimum. Because stamp comparison
//! (not arrival order) decides survival, two reservoirs fed disjoint
//! halves of a stream and then merged are statistically indistinguishable
//! from one reservoir fed the whole stream (§4.1, §8 property 3).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

/// A uniform sampling stamp. Ordinary events draw from `[0, 1)`;
/// priority (Synthetics) events draw from `[1, 2)` so they always beat
/// an ordinary event already resident (§4.1 "Priority variant").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp(pub f64);

impl Stamp {
    pub fn ordinary(rng: &mut impl Rng) -> Self {
        Self(rng.random_range(0.0..1.0))
    }

    pub fn priority(rng: &mut impl Rng) -> Self {
        Self(1.0 + rng.random_range(0.0..1.0))
    }
}

impl Eq for Stamp {}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

struct Entry<T> {
    stamp: Stamp,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.stamp == other.stamp
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp.cmp(&other.stamp)
    }
}

/// Storage regime: a plain append-ordered `Vec` until the reservoir first
/// fills, then a min-heap keyed by stamp. Matches §4.1's "delayed to keep
/// deterministic ordering in small cases" note.
enum Storage<T> {
    Unfilled(Vec<Entry<T>>),
    Full(BinaryHeap<Reverse<Entry<T>>>),
}

/// A capacity-bounded reservoir of sampled events.
pub struct BoundedEventReservoir<T> {
    capacity: usize,
    seen: u64,
    failed: u32,
    retry_limit: u32,
    storage: Storage<T>,
}

impl<T> BoundedEventReservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_retry_limit(capacity, 1)
    }

    pub fn with_retry_limit(capacity: usize, retry_limit: u32) -> Self {
        Self { capacity, seen: 0, failed: 0, retry_limit, storage: Storage::Unfilled(Vec::new()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn events_seen(&self) -> u64 {
        self.seen
    }

    pub fn resident_count(&self) -> usize {
        match &self.storage {
            Storage::Unfilled(v) => v.len(),
            Storage::Full(h) => h.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resident_count() == 0
    }

    /// Insert `payload` with stamp drawn from a uniform `[0, 1)` distribution.
    pub fn add_sampled(&mut self, payload: T, rng: &mut impl Rng) {
        self.add(Stamp::ordinary(rng), payload);
    }

    /// Insert `payload` with a pre-assigned stamp, incrementing the seen counter.
    pub fn add(&mut self, stamp: Stamp, payload: T) {
        self.seen += 1;
        self.insert(stamp, payload);
    }

    /// Admit `stamp`/`payload` without touching the seen counter — the
    /// shared primitive behind `add`, `merge`, and `merge_failed`.
    fn insert(&mut self, stamp: Stamp, payload: T) {
        let entry = Entry { stamp, payload };
        match &mut self.storage {
            Storage::Unfilled(items) => {
                items.push(entry);
                if items.len() >= self.capacity {
                    let items = std::mem::take(items);
                    let heap: BinaryHeap<Reverse<Entry<T>>> =
                        items.into_iter().map(Reverse).collect();
                    self.storage = Storage::Full(heap);
                }
            }
            Storage::Full(heap) => {
                let admit = match heap.peek() {
                    Some(Reverse(min)) => stamp > min.stamp,
                    None => true,
                };
                if admit {
                    heap.pop();
                    heap.push(Reverse(entry));
                }
            }
        }
    }

    fn into_entries(self) -> (u64, u32, Vec<Entry<T>>) {
        let entries = match self.storage {
            Storage::Unfilled(v) => v,
            Storage::Full(h) => h.into_iter().map(|Reverse(e)| e).collect(),
        };
        (self.seen, self.failed, entries)
    }

    /// Merge `other` in as if every one of its events had been `add`ed,
    /// except the combined seen-count is the sum of both originals rather
    /// than incremented per insertion.
    pub fn merge(&mut self, other: Self) {
        let (other_seen, _failed, entries) = other.into_entries();
        self.seen += other_seen;
        for e in entries {
            self.insert(e.stamp, e.payload);
        }
    }

    /// Merge a harvest that failed to send, honoring the retry cap (§4.1,
    /// §8 property 4). `other` carries its own failed-harvest count,
    /// incremented here; once that would exceed the retry limit the data
    /// is discarded outright and this reservoir's own failed counter is
    /// left untouched.
    pub fn merge_failed(&mut self, other: Self) {
        let attempt = other.failed + 1;
        if attempt > self.retry_limit {
            return;
        }
        self.failed = attempt;
        let (other_seen, _, entries) = other.into_entries();
        self.seen += other_seen;
        for e in entries {
            self.insert(e.stamp, e.payload);
        }
    }

    pub fn failed_count(&self) -> u32 {
        self.failed
    }
}

impl<T: Serialize> BoundedEventReservoir<T> {
    /// `[run_id, {reservoir_size, events_seen}, [payload, ...]]`, events in
    /// heap order (not sorted); `[]` when empty.
    pub fn serialize(&self, run_id: &str) -> Value {
        let payloads: Vec<&T> = match &self.storage {
            Storage::Unfilled(v) => v.iter().map(|e| &e.payload).collect(),
            Storage::Full(h) => h.iter().map(|Reverse(e)| &e.payload).collect(),
        };
        serde_json::json!([
            run_id,
            { "reservoir_size": self.capacity, "events_seen": self.seen },
            payloads,
        ])
    }
}

#[cfg(test)]
#[path = "reservoir_tests.rs"]
mod tests;
