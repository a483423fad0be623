// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: listen socket, collector TLS toggle, harvest
//! defaults, and registry limits. Thin by design — the bulk of the
//! daemon's behavior is not configurable at the process boundary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Top-level CLI for the daemon process.
#[derive(Debug, Clone, Parser)]
#[command(name = "nrd", version, about = "Local telemetry aggregation daemon")]
pub struct DaemonConfig {
    /// Unix-domain socket path to listen on for agent connections.
    /// A leading '@' selects a Linux abstract-namespace socket.
    #[arg(long, default_value = "/tmp/.nrd.sock", env = "NRD_SOCKET")]
    pub socket: String,

    /// Disable TLS when talking to the collector (testing only).
    #[arg(long, env = "NRD_NO_TLS")]
    pub no_tls: bool,

    /// Log level / filter, passed through to `tracing_subscriber::EnvFilter`.
    #[arg(long, default_value = "info", env = "NRD_LOG")]
    pub log_level: String,

    /// Default redirect-collector host used for the first connect phase.
    #[arg(long, default_value = "collector.newrelic.com", env = "NRD_REDIRECT_COLLECTOR")]
    pub redirect_collector: String,

    /// Default harvest period in seconds, used when the collector does
    /// not declare per-kind periods in its connect reply.
    #[arg(long, default_value_t = 60, env = "NRD_DEFAULT_HARVEST_SECS")]
    pub default_harvest_secs: u64,

    /// Maximum number of distinct applications tracked concurrently.
    #[arg(long, default_value_t = 250, env = "NRD_MAX_APPS")]
    pub max_apps: usize,

    /// An app with no agent activity for this many seconds is torn down.
    #[arg(long, default_value_t = 60 * 60, env = "NRD_INACTIVITY_SECS")]
    pub inactivity_secs: u64,

    /// Minimum backoff between connect attempts for a single app, in seconds.
    #[arg(long, default_value_t = 15, env = "NRD_CONNECT_BACKOFF_SECS")]
    pub connect_backoff_secs: u64,

    /// Per-collector-request timeout in seconds.
    #[arg(long, default_value_t = 10, env = "NRD_COLLECTOR_TIMEOUT_SECS")]
    pub collector_timeout_secs: u64,

    /// Path to a JSON file of per-license harvest-trigger overrides,
    /// keyed by `sha256-base64(license)`. See `harvest_trigger.rs`.
    #[arg(long, env = "NRD_TRIGGER_OVERRIDES")]
    pub trigger_overrides: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn default_harvest_period(&self) -> Duration {
        Duration::from_secs(self.default_harvest_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector_timeout_secs)
    }

    pub fn collector_scheme(&self) -> &'static str {
        if self.no_tls {
            "http"
        } else {
            "https"
        }
    }
}
