// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slow-SQL aggregation table, keyed by an opaque SQL identifier (a hash
//! of the normalized query, computed by the agent — §4.3).

use std::collections::HashMap;

use serde_json::Value;

use crate::payload::HarvestPayload;

#[derive(Debug, Clone)]
pub struct SlowSqlRecord {
    pub count: u64,
    pub total_micros: u64,
    pub min_micros: u64,
    pub max_micros: u64,
    pub last_query: String,
    pub last_params: Value,
    pub txn_name: String,
    pub url: String,
}

impl SlowSqlRecord {
    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.total_micros += other.total_micros;
        self.min_micros = self.min_micros.min(other.min_micros);
        self.max_micros = self.max_micros.max(other.max_micros);
        // Last-write-wins for the most recent occurrence's context.
        self.last_query = other.last_query.clone();
        self.last_params = other.last_params.clone();
        self.txn_name = other.txn_name.clone();
        self.url = other.url.clone();
    }
}

pub struct SlowSqls {
    rows: HashMap<String, SlowSqlRecord>,
}

impl SlowSqls {
    pub fn new() -> Self {
        Self { rows: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn add(&mut self, sql_id: &str, sample: SlowSqlRecord) {
        match self.rows.get_mut(sql_id) {
            Some(existing) => existing.merge(&sample),
            None => {
                self.rows.insert(sql_id.to_owned(), sample);
            }
        }
    }

    pub fn merge(&mut self, other: Self) {
        for (id, record) in other.rows {
            self.add(&id, record);
        }
    }
}

impl Default for SlowSqls {
    fn default() -> Self {
        Self::new()
    }
}

impl HarvestPayload for SlowSqls {
    fn is_empty(&self) -> bool {
        SlowSqls::is_empty(self)
    }

    fn command_name(&self) -> &'static str {
        "sql_trace_data"
    }

    fn data(&self, run_id: &str, _harvest_start_epoch: u64, _harvest_end_epoch: u64) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|(id, r)| {
                serde_json::json!([
                    r.txn_name,
                    r.url,
                    id,
                    r.last_query,
                    r.count,
                    r.total_micros,
                    r.min_micros,
                    r.max_micros,
                    r.last_params,
                ])
            })
            .collect();
        serde_json::json!([run_id, rows])
    }

    fn failed_harvest(self, successor: &mut Self) {
        successor.merge(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(micros: u64) -> SlowSqlRecord {
        SlowSqlRecord {
            count: 1,
            total_micros: micros,
            min_micros: micros,
            max_micros: micros,
            last_query: "select 1".into(),
            last_params: serde_json::json!({}),
            txn_name: "WebTransaction/foo".into(),
            url: "/foo".into(),
        }
    }

    #[test]
    fn merges_on_collision() {
        let mut s = SlowSqls::new();
        s.add("abc", sample(100));
        s.add("abc", sample(300));
        assert_eq!(s.len(), 1);
        let row = &s.rows["abc"];
        assert_eq!(row.count, 2);
        assert_eq!(row.total_micros, 400);
        assert_eq!(row.min_micros, 100);
        assert_eq!(row.max_micros, 300);
    }

    #[test]
    fn distinct_ids_stay_distinct() {
        let mut s = SlowSqls::new();
        s.add("abc", sample(100));
        s.add("def", sample(100));
        assert_eq!(s.len(), 2);
    }
}
