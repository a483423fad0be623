// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AppHarvest`: a running harvest context for one connected app.
//!
//! The processor keeps one `AppHarvest` per live `RunId`. Tearing one
//! down cancels its trigger task(s) and waits for confirmation before the
//! entry is dropped, so no spurious harvest-due event arrives after
//! teardown (§5 "Cancellation").

use tokio_util::sync::CancellationToken;

use crate::app::AppKey;
use crate::harvest::Harvest;

pub struct AppHarvest {
    pub app_key: AppKey,
    pub harvest: Harvest,
    /// Cancels this app's trigger task(s). Cloned into the spawned
    /// trigger so teardown is a single `cancel()` call.
    pub trigger_cancel: CancellationToken,
}

impl AppHarvest {
    pub fn new(app_key: AppKey, harvest: Harvest, trigger_cancel: CancellationToken) -> Self {
        Self { app_key, harvest, trigger_cancel }
    }

    /// Swap in a fresh empty harvest, returning the old one for a worker
    /// task to drain. Guarantees no further ingestion can mutate the
    /// in-flight payload (§3 invariant, §5 "Swap atomicity").
    pub fn swap_all(&mut self) -> Harvest {
        std::mem::take(&mut self.harvest)
    }

    pub fn shutdown(&self) {
        self.trigger_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppKey;

    fn key() -> AppKey {
        AppKey {
            license: "lic".into(),
            app_name: "app".into(),
            redirect_collector: "collector.newrelic.com".into(),
            high_security: false,
            language: "php".into(),
        }
    }

    #[test]
    fn swap_all_leaves_an_empty_harvest_behind() {
        let mut ah = AppHarvest::new(key(), Harvest::new(), CancellationToken::new());
        ah.harvest.metrics.add_forced("x", 1.0);
        assert!(!ah.harvest.metrics.is_empty());

        let drained = ah.swap_all();
        assert!(!drained.metrics.is_empty());
        assert!(ah.harvest.metrics.is_empty());
    }
}
