// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drains one swapped-out `Harvest`: stamps supportability metrics,
//! applies rename rules, and dispatches each non-empty payload to the
//! collector concurrently (§4.6 "On receipt of a harvest event").
//!
//! Grounded on `upstream/health.rs`'s "snapshot, then fan out one
//! request per entry, collect results" shape, generalized from a
//! fixed health-check call to the seven heterogeneous payload kinds.

use crate::app::AppKey;
use crate::collector::classify::classify_harvest;
use crate::collector::client::CollectorClient;
use crate::error::ClassifiedError;
use crate::harvest::{epoch_secs, Harvest, RunId};
use crate::metric_table::RenameRule;
use crate::payload::HarvestPayload;

/// What the processor does after a worker finishes: merge the
/// retryable remnants back into the live harvest, and/or drive an App
/// state transition if any payload signalled one (§4.6's error table).
pub struct HarvestWorkerResult {
    pub run_id: RunId,
    pub retry_remnant: Harvest,
    /// The most severe state-changing classification observed across
    /// this cycle's payload dispatches, if any.
    pub state_signal: Option<ClassifiedError>,
}

enum Outcome<T> {
    Success,
    Dropped,
    Retry(T),
    StateChange(ClassifiedError),
}

async fn dispatch_one<T: HarvestPayload>(
    client: &CollectorClient,
    license_key: &str,
    run_id: &RunId,
    harvest_start: u64,
    harvest_end: u64,
    payload: T,
) -> Outcome<T> {
    if payload.is_empty() {
        return Outcome::Dropped;
    }
    let body = payload.data(&run_id.0, harvest_start, harvest_end);
    let command = payload.command_name();

    let raw = match client.invoke(command, license_key, Some(run_id), &body).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(command, err = %e, "collector request failed, will retry next harvest");
            return Outcome::Retry(payload);
        }
    };

    match classify_harvest(&raw) {
        Ok(_) => Outcome::Success,
        Err(ClassifiedError::PayloadTooLarge) | Err(ClassifiedError::UnsupportedMedia) => {
            tracing::warn!(command, "payload rejected, dropping without retry");
            Outcome::Dropped
        }
        Err(e @ (ClassifiedError::RestartRequired | ClassifiedError::Disconnect | ClassifiedError::LicenseInvalid)) => {
            tracing::warn!(command, err = %e, "collector signalled a state change");
            Outcome::StateChange(e)
        }
        Err(ClassifiedError::Other) => Outcome::Retry(payload),
    }
}

fn most_severe(a: Option<ClassifiedError>, b: Option<ClassifiedError>) -> Option<ClassifiedError> {
    fn rank(e: &ClassifiedError) -> u8 {
        match e {
            ClassifiedError::Disconnect => 3,
            ClassifiedError::LicenseInvalid => 2,
            ClassifiedError::RestartRequired => 1,
            ClassifiedError::PayloadTooLarge | ClassifiedError::UnsupportedMedia | ClassifiedError::Other => 0,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => Some(if rank(&x) >= rank(&y) { x } else { y }),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// Drains `old` for app `key` against `run_id`, returning the remnants
/// to merge back plus any state signal. `rename_rules` and
/// finalization are applied once, up front, per §4.6/§9.
pub async fn run(
    client: &CollectorClient,
    key: &AppKey,
    run_id: RunId,
    mut old: Harvest,
    rename_rules: &[RenameRule],
) -> HarvestWorkerResult {
    old.finalize();
    old.metrics.apply_rules(rename_rules);

    let start = old.started_at_epoch();
    let end = epoch_secs();
    let license = &key.license;

    let mut retry_remnant = Harvest::new();
    let mut state_signal = None;

    match dispatch_one(client, license, &run_id, start, end, old.metrics).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.metrics),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.errors).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.errors),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.slow_sqls).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.slow_sqls),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.traces).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.traces),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.txn_events).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.txn_events),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.custom_events).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.custom_events),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }
    match dispatch_one(client, license, &run_id, start, end, old.error_events).await {
        Outcome::Retry(p) => p.failed_harvest(&mut retry_remnant.error_events),
        Outcome::StateChange(e) => state_signal = most_severe(state_signal, Some(e)),
        Outcome::Success | Outcome::Dropped => {}
    }

    HarvestWorkerResult { run_id, retry_remnant, state_signal }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_severe_prefers_disconnect_over_restart() {
        let r = most_severe(Some(ClassifiedError::RestartRequired), Some(ClassifiedError::Disconnect));
        assert_eq!(r, Some(ClassifiedError::Disconnect));
    }

    #[test]
    fn most_severe_keeps_existing_when_new_is_none() {
        let r = most_severe(Some(ClassifiedError::LicenseInvalid), None);
        assert_eq!(r, Some(ClassifiedError::LicenseInvalid));
    }
}
