// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-harvest metric table: six-tuple samples keyed by `(name, scope)`.
//!
//! Grounded on the field layout in
//! `examples/original_source/php_agent/src/newrelic/protocol/MetricData.go`
//! (count, total, exclusive, min, max, sum_of_squares, forced).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// A six-tuple metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub count: f64,
    pub total: f64,
    pub exclusive: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl MetricSample {
    pub fn single(value: f64) -> Self {
        Self { count: 1.0, total: value, exclusive: value, min: value, max: value, sum_of_squares: value * value }
    }

    /// Combine two samples taken of the same metric. Count/total/exclusive/
    /// sum-of-squares accumulate; min/max track the true extremes (this
    /// resolves an ambiguity in the merge contract — see `DESIGN.md`).
    fn combine(&mut self, other: &Self) {
        self.count += other.count;
        self.total += other.total;
        self.exclusive += other.exclusive;
        self.sum_of_squares += other.sum_of_squares;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

#[derive(Debug, Clone)]
struct Row {
    sample: MetricSample,
    forced: bool,
}

/// An ordered renaming/ignore rule, applied in sequence before
/// serialization (§4.2 `applyRules`).
#[derive(Debug, Clone)]
pub struct RenameRule {
    pub match_name: String,
    pub match_scope: Option<String>,
    /// `None` means "drop this metric".
    pub replacement: Option<String>,
    /// Once matched, stop evaluating further rules against this metric.
    pub terminal: bool,
}

/// Capacity-bounded table of metric rows for one harvest.
pub struct MetricTable {
    capacity: usize,
    rows: BTreeMap<(String, Option<String>), Row>,
    dropped: u64,
}

impl MetricTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, rows: BTreeMap::new(), dropped: 0 }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Accumulate a sample into `(name, scope)`. Unforced insertions past
    /// capacity are counted and dropped; forced metrics always admit, and
    /// once a row is forced it stays forced.
    pub fn add_raw(&mut self, name: &str, scope: Option<&str>, sample: MetricSample, forced: bool) {
        let key = (name.to_owned(), scope.map(str::to_owned));
        if let Some(row) = self.rows.get_mut(&key) {
            row.sample.combine(&sample);
            row.forced |= forced;
            return;
        }
        if !forced && self.rows.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.rows.insert(key, Row { sample, forced });
    }

    /// Force-insert a supportability/internal metric regardless of capacity.
    pub fn add_forced(&mut self, name: &str, value: f64) {
        self.add_raw(name, None, MetricSample::single(value), true);
    }

    /// Apply ordered renaming/ignore rules. Rules are opaque to the table
    /// beyond their ordered apply-all, first-match-wins-per-metric semantics.
    pub fn apply_rules(&mut self, rules: &[RenameRule]) {
        let old = std::mem::take(&mut self.rows);
        for ((name, scope), row) in old {
            let mut name = name;
            let mut dropped = false;
            for rule in rules {
                if rule.match_name != name {
                    continue;
                }
                if let Some(ref rule_scope) = rule.match_scope {
                    if Some(rule_scope.as_str()) != scope.as_deref() {
                        continue;
                    }
                }
                match &rule.replacement {
                    Some(replacement) => name = replacement.clone(),
                    None => {
                        dropped = true;
                    }
                }
                if rule.terminal || dropped {
                    break;
                }
            }
            if dropped {
                continue;
            }
            match self.rows.get_mut(&(name.clone(), scope.clone())) {
                Some(existing) => {
                    existing.sample.combine(&row.sample);
                    existing.forced |= row.forced;
                }
                None => {
                    self.rows.insert((name, scope), row);
                }
            }
        }
    }

    pub fn merge_failed(&mut self, other: Self) {
        for ((name, scope), row) in other.rows {
            self.add_raw(&name, scope.as_deref(), row.sample, row.forced);
        }
    }

    /// `[run_id, start_epoch, end_epoch, [[{name, scope?}, tuple], ...]]`,
    /// rows sorted by name then scope (the `BTreeMap` key order already
    /// guarantees this).
    pub fn serialize(&self, run_id: &str, start_epoch: u64, end_epoch: u64) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|((name, scope), row)| {
                let mut header = serde_json::json!({ "name": name });
                if let Some(scope) = scope {
                    header["scope"] = Value::String(scope.clone());
                }
                serde_json::json!([header, row.sample])
            })
            .collect();
        serde_json::json!([run_id, start_epoch, end_epoch, rows])
    }
}

impl crate::payload::HarvestPayload for MetricTable {
    fn is_empty(&self) -> bool {
        MetricTable::is_empty(self)
    }

    fn command_name(&self) -> &'static str {
        "metric_data"
    }

    fn data(&self, run_id: &str, harvest_start_epoch: u64, harvest_end_epoch: u64) -> Value {
        self.serialize(run_id, harvest_start_epoch, harvest_end_epoch)
    }

    fn failed_harvest(self, successor: &mut Self) {
        successor.merge_failed(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addraw_accumulates_and_respects_forced_flag() {
        let mut t = MetricTable::new(2);
        t.add_raw("a", None, MetricSample::single(1.0), false);
        t.add_raw("a", None, MetricSample::single(3.0), false);
        assert_eq!(t.len(), 1);

        let v = t.serialize("r", 0, 1);
        let row = &v[3][0];
        assert_eq!(row[1]["count"], 2.0);
        assert_eq!(row[1]["total"], 4.0);
        assert_eq!(row[1]["min"], 1.0);
        assert_eq!(row[1]["max"], 3.0);
    }

    #[test]
    fn capacity_drops_unforced_but_never_forced() {
        let mut t = MetricTable::new(1);
        t.add_raw("a", None, MetricSample::single(1.0), false);
        t.add_raw("b", None, MetricSample::single(1.0), false);
        assert_eq!(t.len(), 1);
        assert_eq!(t.dropped_count(), 1);

        t.add_forced("c", 5.0);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn apply_rules_renames_and_drops() {
        let mut t = MetricTable::new(10);
        t.add_raw("Old/Name", None, MetricSample::single(1.0), false);
        t.add_raw("Drop/Me", None, MetricSample::single(1.0), false);

        let rules = vec![
            RenameRule {
                match_name: "Old/Name".into(),
                match_scope: None,
                replacement: Some("New/Name".into()),
                terminal: true,
            },
            RenameRule {
                match_name: "Drop/Me".into(),
                match_scope: None,
                replacement: None,
                terminal: true,
            },
        ];
        t.apply_rules(&rules);

        let v = t.serialize("r", 0, 1);
        let names: Vec<&str> = v[3].as_array().unwrap().iter().map(|row| row[0]["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["New/Name"]);
    }

    #[test]
    fn serialize_sorts_by_name_then_scope() {
        let mut t = MetricTable::new(10);
        t.add_raw("b", None, MetricSample::single(1.0), false);
        t.add_raw("a", Some("TxnB"), MetricSample::single(1.0), false);
        t.add_raw("a", Some("TxnA"), MetricSample::single(1.0), false);

        let v = t.serialize("r", 0, 1);
        let rows = v[3].as_array().unwrap();
        let keys: Vec<(String, Option<String>)> = rows
            .iter()
            .map(|row| {
                let name = row[0]["name"].as_str().unwrap().to_owned();
                let scope = row[0].get("scope").and_then(|s| s.as_str()).map(str::to_owned);
                (name, scope)
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_owned(), Some("TxnA".to_owned())),
                ("a".to_owned(), Some("TxnB".to_owned())),
                ("b".to_owned(), None),
            ]
        );
    }
}
