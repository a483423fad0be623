// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host utilization gate (§4.6: an app may not attempt `connect` until a
//! utilization snapshot is available).
//!
//! The daemon treats host utilization discovery (Docker/Kubernetes/cloud
//! metadata probing) as out of scope — spec.md Non-goals — but the
//! *shape* of the gate it creates is real: processor startup blocks app
//! connects on one `oneshot` that resolves once, then never again.
//! Grounded on the teacher's own one-shot readiness gates in
//! `upstream/health.rs`.

use serde_json::Value;
use tokio::sync::watch;

/// Supplies the one-time utilization snapshot forwarded verbatim in each
/// app's `connect` payload. A real implementation would probe
/// `/proc`, Docker cgroup files, and cloud metadata endpoints; that
/// probing is explicitly out of scope here (spec.md Non-goals), so the
/// only implementation shipped is a stub that resolves immediately with
/// an empty object.
pub trait UtilizationProvider: Send + Sync + 'static {
    fn snapshot(&self) -> Value;
}

/// Resolves immediately with `{}` — there is nothing to probe.
pub struct StubUtilizationProvider;

impl UtilizationProvider for StubUtilizationProvider {
    fn snapshot(&self) -> Value {
        serde_json::json!({})
    }
}

/// A one-shot "is utilization ready" gate shared across the processor's
/// apps. `watch` rather than `oneshot` because many call sites just want
/// to peek at the current value without consuming it.
#[derive(Clone)]
pub struct UtilizationGate {
    rx: watch::Receiver<bool>,
}

impl UtilizationGate {
    pub fn ready(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Starts an already-ready gate paired with the given provider's
/// snapshot. In a future revision where probing is asynchronous, this
/// would instead spawn a task that flips the watch once probing
/// completes.
pub fn start(_provider: &dyn UtilizationProvider) -> UtilizationGate {
    let (_tx, rx) = watch::channel(true);
    UtilizationGate { rx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_provider_yields_empty_object() {
        let snap = StubUtilizationProvider.snapshot();
        assert_eq!(snap, serde_json::json!({}));
    }

    #[test]
    fn gate_starts_ready() {
        let gate = start(&StubUtilizationProvider);
        assert!(gate.ready());
    }
}
