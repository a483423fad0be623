// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Harvest`: the bundle of one-per-kind reservoirs for a single run ID.
//!
//! Grounded on `examples/original_source/src/newrelic/harvest.go`'s
//! `Harvest` struct (one of each payload kind plus PID tracking) and
//! `createFinalMetrics` (supportability metrics stamped on every full
//! harvest before serialization).

use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_heap::ErrorHeap;
use crate::metric_table::MetricTable;
use crate::payload::HarvestPayload;
use crate::reservoir::BoundedEventReservoir;
use crate::slow_sql::SlowSqls;
use crate::txn_trace::TxnTraces;

pub const TXN_EVENT_CAPACITY: usize = 10_000;
pub const CUSTOM_EVENT_CAPACITY: usize = 10_000;
pub const ERROR_EVENT_CAPACITY: usize = 100;
pub const METRIC_TABLE_CAPACITY: usize = 2_000;
pub const ERROR_HEAP_CAPACITY: usize = 20;
/// §4.1/§8 property 4: a poison-pill reservoir gets at most this many
/// consecutive merge-back attempts before being discarded outright.
pub const EVENT_RETRY_LIMIT: u32 = 1;

/// Opaque collector-assigned run identifier. Scopes all data submissions
/// for one App until it is retired by restart or disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which slot (or "all") a harvest-due tick refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestKind {
    All,
    TxnEvents,
    CustomEvents,
    ErrorEvents,
}

macro_rules! event_payload_wrapper {
    ($name:ident, $cmd:literal) => {
        pub struct $name(pub BoundedEventReservoir<Value>);

        impl $name {
            pub fn new(capacity: usize) -> Self {
                Self(BoundedEventReservoir::with_retry_limit(capacity, EVENT_RETRY_LIMIT))
            }
        }

        impl HarvestPayload for $name {
            fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            fn command_name(&self) -> &'static str {
                $cmd
            }

            fn data(&self, run_id: &str, _start: u64, _end: u64) -> Value {
                self.0.serialize(run_id)
            }

            fn failed_harvest(self, successor: &mut Self) {
                successor.0.merge_failed(self.0);
            }
        }
    };
}

event_payload_wrapper!(TxnEventPayload, "analytic_event_data");
event_payload_wrapper!(CustomEventPayload, "custom_event_data");
event_payload_wrapper!(ErrorEventPayload, "error_event_data");

/// One bundle of reservoirs/tables for a single run ID.
pub struct Harvest {
    pub metrics: MetricTable,
    pub errors: ErrorHeap,
    pub slow_sqls: SlowSqls,
    pub traces: TxnTraces,
    pub txn_events: TxnEventPayload,
    pub custom_events: CustomEventPayload,
    pub error_events: ErrorEventPayload,
    pids: HashSet<u32>,
    processed_commands: u64,
    started_at_epoch: u64,
}

impl Harvest {
    pub fn new() -> Self {
        Self {
            metrics: MetricTable::new(METRIC_TABLE_CAPACITY),
            errors: ErrorHeap::new(ERROR_HEAP_CAPACITY),
            slow_sqls: SlowSqls::new(),
            traces: TxnTraces::new(),
            txn_events: TxnEventPayload::new(TXN_EVENT_CAPACITY),
            custom_events: CustomEventPayload::new(CUSTOM_EVENT_CAPACITY),
            error_events: ErrorEventPayload::new(ERROR_EVENT_CAPACITY),
            pids: HashSet::new(),
            processed_commands: 0,
            started_at_epoch: epoch_secs(),
        }
    }

    pub fn started_at_epoch(&self) -> u64 {
        self.started_at_epoch
    }

    pub fn note_pid(&mut self, pid: u32) {
        self.pids.insert(pid);
    }

    pub fn pid_count(&self) -> usize {
        self.pids.len()
    }

    pub fn note_command_processed(&mut self) {
        self.processed_commands += 1;
    }

    pub fn processed_commands(&self) -> u64 {
        self.processed_commands
    }

    /// Stamp self-observed supportability metrics before a `HarvestAll`
    /// send. Mirrors `createFinalMetrics` in the original daemon: run
    /// once, after all other data for the cycle has been ingested, before
    /// rename rules and serialization (§9 Open Question: rules therefore
    /// *can* rename these — see `DESIGN.md`).
    pub fn finalize(&mut self) {
        self.metrics.add_forced("Instance/Reporting", 1.0);

        self.metrics.add_forced(
            "Supportability/AnalyticsEvents/TotalEventsSeen",
            self.txn_events.0.events_seen() as f64,
        );
        self.metrics.add_forced(
            "Supportability/AnalyticsEvents/TotalEventsSent",
            self.txn_events.0.resident_count() as f64,
        );
        self.metrics.add_forced(
            "Supportability/Events/Customer/Seen",
            self.custom_events.0.events_seen() as f64,
        );
        self.metrics.add_forced(
            "Supportability/Events/Customer/Sent",
            self.custom_events.0.resident_count() as f64,
        );
        self.metrics.add_forced(
            "Supportability/Events/TransactionError/Seen",
            self.error_events.0.events_seen() as f64,
        );
        self.metrics.add_forced(
            "Supportability/Events/TransactionError/Sent",
            self.error_events.0.resident_count() as f64,
        );
        self.metrics.add_forced(
            "Supportability/Daemon/CommandsProcessed",
            self.processed_commands as f64,
        );
    }
}

impl Default for Harvest {
    fn default() -> Self {
        Self::new()
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_produces_e6_supportability_metrics() {
        let mut h = Harvest::new();
        let mut rng = rand::rng();

        for i in 0..8u32 {
            h.txn_events.0.add_sampled(serde_json::json!({"i": i}), &mut rng);
        }
        for i in 0..4u32 {
            h.custom_events.0.add_sampled(serde_json::json!({"i": i}), &mut rng);
        }
        for i in 0..7u32 {
            h.error_events.0.add_sampled(serde_json::json!({"i": i}), &mut rng);
        }

        h.finalize();

        let v = h.metrics.serialize("run", 0, 1);
        let names: Vec<String> =
            v[3].as_array().unwrap().iter().map(|row| row[0]["name"].as_str().unwrap().to_owned()).collect();

        assert!(names.contains(&"Instance/Reporting".to_owned()));
        assert!(names.contains(&"Supportability/AnalyticsEvents/TotalEventsSeen".to_owned()));
        assert!(names.contains(&"Supportability/AnalyticsEvents/TotalEventsSent".to_owned()));
        assert!(names.contains(&"Supportability/Events/Customer/Seen".to_owned()));
        assert!(names.contains(&"Supportability/Events/Customer/Sent".to_owned()));
        assert!(names.contains(&"Supportability/Events/TransactionError/Seen".to_owned()));
        assert!(names.contains(&"Supportability/Events/TransactionError/Sent".to_owned()));

        let by_name = |name: &str| -> f64 {
            v[3].as_array()
                .unwrap()
                .iter()
                .find(|row| row[0]["name"] == name)
                .map(|row| row[1]["total"].as_f64().unwrap())
                .unwrap()
        };
        assert_eq!(by_name("Instance/Reporting"), 1.0);
        assert_eq!(by_name("Supportability/AnalyticsEvents/TotalEventsSeen"), 8.0);
        assert_eq!(by_name("Supportability/AnalyticsEvents/TotalEventsSent"), 8.0);
        assert_eq!(by_name("Supportability/Events/Customer/Seen"), 4.0);
        assert_eq!(by_name("Supportability/Events/Customer/Sent"), 4.0);
        assert_eq!(by_name("Supportability/Events/TransactionError/Seen"), 7.0);
        assert_eq!(by_name("Supportability/Events/TransactionError/Sent"), 7.0);
    }

    #[test]
    fn fresh_harvest_is_fully_empty() {
        let h = Harvest::new();
        assert!(h.metrics.is_empty());
        assert!(h.errors.is_empty());
        assert!(h.slow_sqls.is_empty());
        assert!(h.traces.is_empty());
        assert!(h.txn_events.is_empty());
        assert!(h.custom_events.is_empty());
        assert!(h.error_events.is_empty());
    }
}
