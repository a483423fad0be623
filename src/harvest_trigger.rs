// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-rate harvest trigger: one ticker per data kind, fanned into a
//! single shared channel the processor selects on (§4.6 "Harvest
//! scheduling", §9 "Multi-rate trigger fan-in").
//!
//! Grounded on `upstream/poller.rs`'s pattern of independent
//! `tokio::time::interval` loops, each racing a `CancellationToken` in a
//! `tokio::select!`, for the "N producers, one consumer, one cancel"
//! shape.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::harvest::{HarvestKind, RunId};

/// How often each harvest kind fires for one app.
#[derive(Debug, Clone)]
pub enum TriggerPattern {
    /// A single ticker emits `HarvestAll` at `period` — used when the
    /// collector declares (or is silent on) equal reporting periods.
    Uniform { period: Duration },
    /// Independent per-kind periods.
    PerKind { default: Duration, txn_events: Duration, custom_events: Duration, error_events: Duration },
}

impl TriggerPattern {
    pub fn uniform(period: Duration) -> Self {
        Self::Uniform { period }
    }
}

/// Spawn the trigger task(s) for one app's harvest. Events are sent as
/// `(run_id, kind)` into `tx`; the caller is responsible for the
/// corresponding `cancel.cancel()` + task-join teardown sequence.
pub fn spawn(run_id: RunId, pattern: TriggerPattern, tx: mpsc::UnboundedSender<(RunId, HarvestKind)>, cancel: CancellationToken) {
    match pattern {
        TriggerPattern::Uniform { period } => {
            spawn_ticker(run_id, HarvestKind::All, period, tx, cancel);
        }
        TriggerPattern::PerKind { default, txn_events, custom_events, error_events } => {
            spawn_ticker(run_id.clone(), HarvestKind::All, default, tx.clone(), cancel.clone());
            spawn_ticker(run_id.clone(), HarvestKind::TxnEvents, txn_events, tx.clone(), cancel.clone());
            spawn_ticker(run_id.clone(), HarvestKind::CustomEvents, custom_events, tx.clone(), cancel.clone());
            spawn_ticker(run_id, HarvestKind::ErrorEvents, error_events, tx, cancel);
        }
    }
}

fn spawn_ticker(
    run_id: RunId,
    kind: HarvestKind,
    period: Duration,
    tx: mpsc::UnboundedSender<(RunId, HarvestKind)>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; consume it so a freshly
        // connected app doesn't harvest on cycle zero.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if tx.send((run_id.clone(), kind)).is_err() {
                break;
            }
        }
    });
}

/// `sha256-base64(license)`, used to key the trigger override table
/// (§9). Externalized to a config file (`DaemonConfig::trigger_overrides`)
/// rather than burned into source, per the design note's own suggestion.
pub fn license_hash(license: &str) -> String {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(license.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn license_hash_is_stable_and_distinct() {
        let a = license_hash("license-one");
        let b = license_hash("license-one");
        let c = license_hash("license-two");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn uniform_pattern_fires_harvest_all() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        spawn(RunId("r".into()), TriggerPattern::uniform(Duration::from_millis(5)), tx, cancel.clone());

        let (run_id, kind) = rx.recv().await.expect("trigger fired");
        assert_eq!(run_id, RunId("r".into()));
        assert_eq!(kind, HarvestKind::All);
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_further_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicU32::new(0));
        spawn(RunId("r".into()), TriggerPattern::uniform(Duration::from_millis(2)), tx, cancel.clone());

        let _ = rx.recv().await;
        cancel.cancel();
        // Drain whatever was already in flight, then confirm the channel closes.
        while rx.recv().await.is_some() {
            fired.fetch_add(1, Ordering::Relaxed);
            if fired.load(Ordering::Relaxed) > 1000 {
                panic!("trigger did not stop after cancel");
            }
        }
    }
}
