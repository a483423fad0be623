// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-slot "best transaction trace" for a harvest (§4.3).
//!
//! Keeps at most one trace: the longest-duration one seen, unless a
//! candidate is marked `force_persist` (e.g. a flagged slow transaction),
//! in which case it always wins. `is_keeper` lets a caller decide without
//! having serialized the candidate's payload yet, so a losing candidate's
//! bytes are never produced.
use std::time::Duration;

use serde_json::Value;

use crate::payload::HarvestPayload;

/// A candidate trace, not yet committed to the slot.
pub struct TraceCandidate {
    pub duration: Duration,
    pub force_persist: bool,
    pub txn_name: String,
    pub payload: Value,
}

struct Kept {
    duration: Duration,
    force_persist: bool,
    txn_name: String,
    payload: Value,
}

#[derive(Default)]
pub struct TxnTraces {
    kept: Option<Kept>,
}

impl TxnTraces {
    pub fn new() -> Self {
        Self { kept: None }
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_none()
    }

    /// Whether `candidate` would replace the currently kept trace, without
    /// requiring the caller to have built the candidate's payload yet.
    pub fn is_keeper(&self, duration: Duration, force_persist: bool) -> bool {
        match &self.kept {
            None => true,
            Some(kept) => {
                if force_persist && !kept.force_persist {
                    return true;
                }
                if kept.force_persist && !force_persist {
                    return false;
                }
                duration > kept.duration
            }
        }
    }

    pub fn offer(&mut self, candidate: TraceCandidate) {
        if !self.is_keeper(candidate.duration, candidate.force_persist) {
            return;
        }
        self.kept = Some(Kept {
            duration: candidate.duration,
            force_persist: candidate.force_persist,
            txn_name: candidate.txn_name,
            payload: candidate.payload,
        });
    }

    pub fn merge(&mut self, other: Self) {
        if let Some(kept) = other.kept {
            self.offer(TraceCandidate {
                duration: kept.duration,
                force_persist: kept.force_persist,
                txn_name: kept.txn_name,
                payload: kept.payload,
            });
        }
    }
}

impl HarvestPayload for TxnTraces {
    fn is_empty(&self) -> bool {
        TxnTraces::is_empty(self)
    }

    fn command_name(&self) -> &'static str {
        "transaction_sample_data"
    }

    fn data(&self, run_id: &str, _harvest_start_epoch: u64, _harvest_end_epoch: u64) -> Value {
        match &self.kept {
            Some(kept) => serde_json::json!([run_id, [[kept.txn_name, kept.payload]]]),
            None => serde_json::json!([run_id, []]),
        }
    }

    fn failed_harvest(self, successor: &mut Self) {
        successor.merge(self);
    }
}
