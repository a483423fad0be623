// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AppKey`, `AppInfo`, and `App` — the per-application identity and
//! mutable state owned exclusively by the processor (§3, §4.6).
//!
//! Grounded on `examples/original_source/src/newrelic/app.go`'s `Info`/
//! `App` split: an immutable identity+config payload decoded once from
//! the agent's first message, and a mutable wrapper the processor drives
//! through its connect/harvest lifecycle.

use std::time::Instant;

use bytes::Bytes;

use crate::metric_table::RenameRule;

/// Identifies one logical application. Two agent connections describing
/// the same license/name/redirect/security/language share one `App`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub license: String,
    pub app_name: String,
    pub redirect_collector: String,
    pub high_security: bool,
    pub language: String,
}

/// Immutable snapshot of an agent's `App` registration message. The
/// daemon never parses `settings`/`environment`/`labels` — they are
/// forwarded to the collector verbatim (§9 "Opaque JSON containers").
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub key: AppKey,
    pub agent_version: String,
    pub host_display_name: String,
    pub settings: Bytes,
    pub environment: Bytes,
    pub labels: Bytes,
}

impl AppInfo {
    pub fn key(&self) -> &AppKey {
        &self.key
    }
}

/// Lifecycle state of an `App` (§3, §4.6's transition table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Unknown,
    Connected,
    InvalidLicense,
    Disconnected,
}

/// One logical application tracked by the processor.
///
/// Mutated only from the processor's event loop; never shared across
/// threads except as an immutable view for reply construction.
pub struct App {
    pub info: AppInfo,
    pub state: AppState,
    pub last_connect_attempt: Option<Instant>,
    pub last_activity: Instant,
    /// Raw bytes of the collector's connect reply, returned verbatim to
    /// agents that ask "am I connected" (§4.7).
    pub connect_reply: Option<Bytes>,
    pub run_id: Option<crate::harvest::RunId>,
    pub rename_rules: Vec<RenameRule>,
    /// The collector host this app was last told to use, after the
    /// redirect phase of connect (§4.2). `None` until the first
    /// successful connect; harvest requests fall back to
    /// `info.key.redirect_collector` until then.
    pub collector_host: Option<String>,
}

impl App {
    pub fn new(info: AppInfo) -> Self {
        Self {
            info,
            state: AppState::Unknown,
            last_connect_attempt: None,
            last_activity: Instant::now(),
            connect_reply: None,
            run_id: None,
            rename_rules: Vec::new(),
            collector_host: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// §4.6: utilization must be available, state must be `Unknown`, and
    /// the per-app backoff since the last attempt must have elapsed.
    pub fn should_connect(&self, utilization_ready: bool, now: Instant, backoff: std::time::Duration) -> bool {
        if !utilization_ready || self.state != AppState::Unknown {
            return false;
        }
        match self.last_connect_attempt {
            None => true,
            Some(last) => now.duration_since(last) >= backoff,
        }
    }

    pub fn is_inactive(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.duration_since(self.last_activity) >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AppKey {
        AppKey {
            license: "lic".into(),
            app_name: "app".into(),
            redirect_collector: "collector.newrelic.com".into(),
            high_security: false,
            language: "php".into(),
        }
    }

    fn info() -> AppInfo {
        AppInfo {
            key: key(),
            agent_version: "1.0".into(),
            host_display_name: "host".into(),
            settings: Bytes::from_static(b"{}"),
            environment: Bytes::from_static(b"[]"),
            labels: Bytes::from_static(b"[]"),
        }
    }

    #[test]
    fn should_connect_requires_unknown_state_and_utilization() {
        let app = App::new(info());
        assert!(app.should_connect(true, Instant::now(), std::time::Duration::from_secs(1)));
        assert!(!app.should_connect(false, Instant::now(), std::time::Duration::from_secs(1)));
    }

    #[test]
    fn should_connect_honors_backoff() {
        let mut app = App::new(info());
        app.last_connect_attempt = Some(Instant::now());
        assert!(!app.should_connect(true, Instant::now(), std::time::Duration::from_secs(60)));
    }

    #[test]
    fn non_unknown_state_never_reconnects() {
        let mut app = App::new(info());
        app.state = AppState::Connected;
        assert!(!app.should_connect(true, Instant::now(), std::time::Duration::from_secs(0)));
    }
}
