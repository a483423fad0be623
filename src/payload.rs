// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared five-method contract all harvestable payload kinds satisfy
//! (§4.3, §9 "Payload polymorphism"). A small capability-set trait rather
//! than open-ended subclassing — each concrete kind (metric table, error
//! heap, slow-SQL table, trace slot, and the three event reservoirs)
//! implements this once.

use serde_json::Value;

/// Everything the processor's harvest pipeline needs from one kind of
/// harvestable data, independent of its internal representation.
pub trait HarvestPayload: Sized {
    /// Whether this payload holds nothing worth sending.
    fn is_empty(&self) -> bool;

    /// The collector method name used to submit this payload, e.g.
    /// `"metric_data"` or `"analytic_event_data"`.
    fn command_name(&self) -> &'static str;

    /// The JSON body to POST to the collector.
    fn data(&self, run_id: &str, harvest_start_epoch: u64, harvest_end_epoch: u64) -> Value;

    /// An alternate audit-log body, or `None` to mean "same as `data`".
    fn audit(&self, run_id: &str, harvest_start_epoch: u64, harvest_end_epoch: u64) -> Option<Value> {
        let _ = (run_id, harvest_start_epoch, harvest_end_epoch);
        None
    }

    /// Merge `self` (a harvest that failed to send) back into `successor`,
    /// the freshly-swapped-in harvest of the same kind.
    fn failed_harvest(self, successor: &mut Self);
}
