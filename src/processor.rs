// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event loop: the single thread of control that owns every App,
//! every Harvest, and every state transition (§4.6, §5).
//!
//! Grounded on the teacher's interval-plus-cancel worker tasks
//! (`upstream/poller.rs`, `upstream/health.rs`) for the *shape* of a
//! `tokio::select!` loop racing a cancellation token against timers and
//! channel receives — generalized here from "many independent loops
//! sharing `Arc<RwLock<_>>` state" to "one loop exclusively owning
//! unshared state," which is what §5's concurrency model requires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app::{App, AppKey, AppState};
use crate::app_harvest::AppHarvest;
use crate::collector::client::CollectorClient;
use crate::collector::connect;
use crate::config::DaemonConfig;
use crate::dispatcher::{AppInfoReply, Inbound};
use crate::error::{ClassifiedError, ConnectError};
use crate::harvest::{Harvest, HarvestKind, RunId};
use crate::harvest_trigger::{self, TriggerPattern};
use crate::harvest_worker::{self, HarvestWorkerResult};
use crate::metric_table::RenameRule;
use crate::utilization::{self, UtilizationGate, UtilizationProvider};

/// Sweep cadence for reconnect-backoff and inactivity checks. Not part
/// of the external config surface — an internal scheduling constant,
/// like the teacher's poller intervals.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Processor {
    config: DaemonConfig,
    apps: HashMap<AppKey, App>,
    harvests: HashMap<RunId, AppHarvest>,
    run_id_owner: HashMap<RunId, AppKey>,
    trigger_overrides: HashMap<String, TriggerPattern>,
    utilization: UtilizationGate,

    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    trigger_tx: mpsc::UnboundedSender<(RunId, HarvestKind)>,
    trigger_rx: mpsc::UnboundedReceiver<(RunId, HarvestKind)>,
    connect_tx: mpsc::UnboundedSender<(AppKey, Result<(connect::ConnectOutcome, String), ConnectError>)>,
    connect_rx: mpsc::UnboundedReceiver<(AppKey, Result<(connect::ConnectOutcome, String), ConnectError>)>,
    harvest_result_tx: mpsc::UnboundedSender<HarvestWorkerResult>,
    harvest_result_rx: mpsc::UnboundedReceiver<HarvestWorkerResult>,

    /// Test hook (§4.6 point 3): posts one token after every handled
    /// event so a test can await a fixed number of loop iterations
    /// instead of racing real time.
    progress_tx: Option<mpsc::UnboundedSender<()>>,
    cancel: CancellationToken,
}

impl Processor {
    pub fn new(
        config: DaemonConfig,
        inbound_rx: mpsc::UnboundedReceiver<Inbound>,
        cancel: CancellationToken,
        progress_tx: Option<mpsc::UnboundedSender<()>>,
    ) -> anyhow::Result<Self> {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (harvest_result_tx, harvest_result_rx) = mpsc::unbounded_channel();
        let trigger_overrides = load_trigger_overrides(&config)?;
        let utilization = utilization::start(&utilization::StubUtilizationProvider);

        Ok(Self {
            config,
            apps: HashMap::new(),
            harvests: HashMap::new(),
            run_id_owner: HashMap::new(),
            trigger_overrides,
            utilization,
            inbound_rx,
            trigger_tx,
            trigger_rx,
            connect_tx,
            connect_rx,
            harvest_result_tx,
            harvest_result_rx,
            progress_tx,
            cancel,
        })
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Priority queue: app-info must never be starved by harvest
            // traffic (§4.6 point 1).
            if let Ok(inbound) = self.inbound_rx.try_recv() {
                self.handle_inbound(inbound).await;
                self.notify_progress();
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound).await;
                }
                Some((run_id, kind)) = self.trigger_rx.recv() => {
                    self.handle_harvest_due(run_id, kind);
                }
                Some((key, result)) = self.connect_rx.recv() => {
                    self.handle_connect_result(key, result);
                }
                Some(result) = self.harvest_result_rx.recv() => {
                    self.handle_harvest_result(result);
                }
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
            self.notify_progress();
        }
    }

    fn notify_progress(&self) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(());
        }
    }

    // -- Inbound from the dispatcher ----------------------------------

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::AppInfo { run_id, info, reply_tx } => {
                let key = info.key().clone();

                if !self.apps.contains_key(&key) && self.apps.len() >= self.config.max_apps {
                    tracing::warn!(app_name = %key.app_name, "app registry at capacity, refusing new app");
                    let _ = reply_tx.send(AppInfoReply::State(AppState::Disconnected));
                    return;
                }

                let app = self.apps.entry(key.clone()).or_insert_with(|| App::new(info.clone()));
                app.touch();

                let reply = match &run_id {
                    Some(req) if app.run_id.as_ref() == Some(req) => AppInfoReply::RunIdValid,
                    _ => match app.state {
                        AppState::Connected => AppInfoReply::Connected {
                            connect_reply: app.connect_reply.clone().unwrap_or_default(),
                        },
                        other => AppInfoReply::State(other),
                    },
                };
                let _ = reply_tx.send(reply);

                if let Some(run_id) = &app.run_id {
                    if let Some(ah) = self.harvests.get_mut(run_id) {
                        ah.harvest.note_command_processed();
                    }
                }

                self.maybe_connect(&key);
            }
            Inbound::TxnData { run_id, opaque } => {
                let Some(run_id) = run_id else {
                    return;
                };
                let Some(ah) = self.harvests.get_mut(&run_id) else {
                    // Retired run ID: drop silently, agent resyncs on its
                    // next AppInfo exchange (§4.6 "Tie-breaks").
                    return;
                };
                ah.harvest.note_command_processed();
                ingest_opaque(&mut ah.harvest, &opaque);
                let app_key = ah.app_key.clone();

                if let Some(app) = self.apps.get_mut(&app_key) {
                    app.touch();
                }
            }
        }
    }

    fn maybe_connect(&mut self, key: &AppKey) {
        let Some(app) = self.apps.get_mut(key) else { return };
        if !app.should_connect(self.utilization.ready(), Instant::now(), self.config.connect_backoff()) {
            return;
        }
        app.last_connect_attempt = Some(Instant::now());

        let info = app.info.clone();
        let scheme = self.config.collector_scheme();
        let redirect_host = key.redirect_collector.clone();
        let timeout = self.config.collector_timeout();
        let license = key.license.clone();
        let utilization_snapshot = utilization::StubUtilizationProvider.snapshot();
        let connect_tx = self.connect_tx.clone();
        let key = key.clone();

        tokio::spawn(async move {
            let mut client = CollectorClient::new(scheme, redirect_host, timeout);
            let result = connect::connect(&mut client, &license, &info, utilization_snapshot).await;
            let host = client.host().to_owned();
            let _ = connect_tx.send((key, result.map(|outcome| (outcome, host))));
        });
    }

    fn handle_connect_result(
        &mut self,
        key: AppKey,
        result: Result<(connect::ConnectOutcome, String), ConnectError>,
    ) {
        let Some(app) = self.apps.get_mut(&key) else { return };

        match result {
            Ok((outcome, host)) => {
                let connect_reply_bytes = Bytes::from(serde_json::to_vec(&outcome.reply).unwrap_or_default());
                app.state = AppState::Connected;
                app.run_id = Some(outcome.run_id.clone());
                app.connect_reply = Some(connect_reply_bytes);
                app.rename_rules = parse_rename_rules(&outcome.reply);
                app.collector_host = Some(host);

                let pattern = self.select_trigger_pattern(&key, &outcome.reply);
                let trigger_cancel = CancellationToken::new();
                let ah = AppHarvest::new(key.clone(), Harvest::new(), trigger_cancel.clone());

                self.harvests.insert(outcome.run_id.clone(), ah);
                self.run_id_owner.insert(outcome.run_id.clone(), key);
                harvest_trigger::spawn(outcome.run_id, pattern, self.trigger_tx.clone(), trigger_cancel);
            }
            Err(ConnectError::LicenseInvalid) => {
                app.state = AppState::InvalidLicense;
            }
            Err(ConnectError::Disconnect) => {
                app.state = AppState::Disconnected;
            }
            Err(ConnectError::Other) => {
                // Remains Unknown; `sweep` retries after backoff elapses.
            }
        }
    }

    fn select_trigger_pattern(&self, key: &AppKey, reply: &Value) -> TriggerPattern {
        let hash = harvest_trigger::license_hash(&key.license);
        if let Some(pattern) = self.trigger_overrides.get(&hash) {
            return pattern.clone();
        }

        let periods = reply.get("harvest_periods");
        let secs = |field: &str| periods.and_then(|p| p.get(field)).and_then(Value::as_u64);
        let default = secs("default");
        let txn_events = secs("txn_events");
        let custom_events = secs("custom_events");
        let error_events = secs("error_events");

        match (default, txn_events, custom_events, error_events) {
            (None, None, None, None) => TriggerPattern::uniform(self.config.default_harvest_period()),
            (d, t, c, e) => {
                let d = d.unwrap_or(self.config.default_harvest_secs);
                if Some(d) == t && Some(d) == c && Some(d) == e {
                    TriggerPattern::uniform(Duration::from_secs(d))
                } else {
                    TriggerPattern::PerKind {
                        default: Duration::from_secs(d),
                        txn_events: Duration::from_secs(t.unwrap_or(d)),
                        custom_events: Duration::from_secs(c.unwrap_or(d)),
                        error_events: Duration::from_secs(e.unwrap_or(d)),
                    }
                }
            }
        }
    }

    // -- Harvest scheduling & dispatch ---------------------------------

    fn handle_harvest_due(&mut self, run_id: RunId, kind: HarvestKind) {
        let Some(ah) = self.harvests.get_mut(&run_id) else { return };
        let Some(key) = self.run_id_owner.get(&run_id).cloned() else { return };
        let Some(app) = self.apps.get(&key) else { return };
        if app.state != AppState::Connected {
            return;
        }

        let host = app.collector_host.clone().unwrap_or_else(|| app.info.key.redirect_collector.clone());
        let rules = app.rename_rules.clone();
        let scheme = self.config.collector_scheme();
        let timeout = self.config.collector_timeout();
        let result_tx = self.harvest_result_tx.clone();

        let old = match kind {
            HarvestKind::All => ah.swap_all(),
            HarvestKind::TxnEvents => {
                let taken = std::mem::replace(
                    &mut ah.harvest.txn_events,
                    crate::harvest::TxnEventPayload::new(crate::harvest::TXN_EVENT_CAPACITY),
                );
                let mut h = Harvest::new();
                h.txn_events = taken;
                h
            }
            HarvestKind::CustomEvents => {
                let taken = std::mem::replace(
                    &mut ah.harvest.custom_events,
                    crate::harvest::CustomEventPayload::new(crate::harvest::CUSTOM_EVENT_CAPACITY),
                );
                let mut h = Harvest::new();
                h.custom_events = taken;
                h
            }
            HarvestKind::ErrorEvents => {
                let taken = std::mem::replace(
                    &mut ah.harvest.error_events,
                    crate::harvest::ErrorEventPayload::new(crate::harvest::ERROR_EVENT_CAPACITY),
                );
                let mut h = Harvest::new();
                h.error_events = taken;
                h
            }
        };

        tokio::spawn(async move {
            let client = CollectorClient::new(scheme, host, timeout);
            let result = harvest_worker::run(&client, &key, run_id, old, &rules).await;
            let _ = result_tx.send(result);
        });
    }

    fn handle_harvest_result(&mut self, result: HarvestWorkerResult) {
        let HarvestWorkerResult { run_id, retry_remnant, state_signal } = result;

        if let Some(ah) = self.harvests.get_mut(&run_id) {
            merge_retry_remnant(&mut ah.harvest, retry_remnant);
        }

        let Some(signal) = state_signal else { return };
        let Some(key) = self.run_id_owner.remove(&run_id) else { return };
        if let Some(ah) = self.harvests.remove(&run_id) {
            ah.shutdown();
        }
        if let Some(app) = self.apps.get_mut(&key) {
            app.run_id = None;
            app.state = match signal {
                ClassifiedError::RestartRequired => AppState::Unknown,
                ClassifiedError::Disconnect => AppState::Disconnected,
                ClassifiedError::LicenseInvalid => AppState::InvalidLicense,
                ClassifiedError::PayloadTooLarge | ClassifiedError::UnsupportedMedia | ClassifiedError::Other => {
                    app.state
                }
            };
        }
    }

    // -- Periodic sweep: reconnect-backoff + inactivity eviction -------

    fn sweep(&mut self) {
        let now = Instant::now();
        let keys: Vec<AppKey> = self.apps.keys().cloned().collect();
        for key in keys {
            self.maybe_connect(&key);
        }

        let timeout = self.config.inactivity_timeout();
        let inactive: Vec<AppKey> = self
            .apps
            .iter()
            .filter(|(_, app)| app.state == AppState::Connected && app.is_inactive(now, timeout))
            .map(|(k, _)| k.clone())
            .collect();
        for key in inactive {
            if let Some(app) = self.apps.remove(&key) {
                if let Some(run_id) = app.run_id {
                    self.run_id_owner.remove(&run_id);
                    if let Some(ah) = self.harvests.remove(&run_id) {
                        ah.shutdown();
                    }
                }
            }
        }
    }
}

fn merge_retry_remnant(live: &mut Harvest, remnant: Harvest) {
    live.metrics.merge_failed(remnant.metrics);
    live.errors.merge(remnant.errors);
    live.slow_sqls.merge(remnant.slow_sqls);
    live.traces.merge(remnant.traces);
    live.txn_events.0.merge(remnant.txn_events.0);
    live.custom_events.0.merge(remnant.custom_events.0);
    live.error_events.0.merge(remnant.error_events.0);
}

/// The opaque Transaction body's wire format is left unspecified beyond
/// "decoded lazily"; this daemon uses a small JSON envelope so the
/// shape is traceable end to end with the collector-facing payloads
/// (see DESIGN.md). Unknown/missing sections are ignored.
fn ingest_opaque(harvest: &mut Harvest, opaque: &[u8]) {
    let Ok(body) = serde_json::from_slice::<Value>(opaque) else {
        tracing::debug!("dropped malformed transaction payload");
        return;
    };

    let mut rng = rand::rng();

    if let Some(metrics) = body.get("metrics").and_then(Value::as_array) {
        for m in metrics {
            let (Some(name), Some(value)) = (m.get(0).and_then(Value::as_str), m.get(1).and_then(Value::as_f64))
            else {
                continue;
            };
            let scope = m.get(2).and_then(Value::as_str);
            harvest.metrics.add_raw(name, scope, crate::metric_table::MetricSample::single(value), false);
        }
    }

    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        for e in errors {
            let priority = e.get("priority").and_then(Value::as_f64).unwrap_or(0.0);
            harvest.errors.add(priority, e.clone());
        }
    }

    if let Some(slow_sqls) = body.get("slow_sqls").and_then(Value::as_array) {
        for s in slow_sqls {
            let Some(id) = s.get("id").and_then(Value::as_str) else { continue };
            let record = crate::slow_sql::SlowSqlRecord {
                count: 1,
                total_micros: s.get("micros").and_then(Value::as_u64).unwrap_or(0),
                min_micros: s.get("micros").and_then(Value::as_u64).unwrap_or(0),
                max_micros: s.get("micros").and_then(Value::as_u64).unwrap_or(0),
                last_query: s.get("query").and_then(Value::as_str).unwrap_or_default().to_owned(),
                last_params: s.get("params").cloned().unwrap_or(Value::Null),
                txn_name: s.get("txn_name").and_then(Value::as_str).unwrap_or_default().to_owned(),
                url: s.get("url").and_then(Value::as_str).unwrap_or_default().to_owned(),
            };
            harvest.slow_sqls.add(id, record);
        }
    }

    if let Some(trace) = body.get("trace") {
        let duration_ms = trace.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
        let force_persist = trace.get("force_persist").and_then(Value::as_bool).unwrap_or(false);
        let txn_name = trace.get("txn_name").and_then(Value::as_str).unwrap_or_default().to_owned();
        if harvest.traces.is_keeper(Duration::from_millis(duration_ms), force_persist) {
            harvest.traces.offer(crate::txn_trace::TraceCandidate {
                duration: Duration::from_millis(duration_ms),
                force_persist,
                txn_name,
                payload: trace.clone(),
            });
        }
    }

    if let Some(events) = body.get("txn_events").and_then(Value::as_array) {
        for event in events {
            harvest.txn_events.0.add_sampled(event.clone(), &mut rng);
        }
    }
    if let Some(events) = body.get("custom_events").and_then(Value::as_array) {
        for event in events {
            harvest.custom_events.0.add_sampled(event.clone(), &mut rng);
        }
    }
    if let Some(events) = body.get("error_events").and_then(Value::as_array) {
        for event in events {
            let is_synthetics = event.get("synthetics").and_then(Value::as_bool).unwrap_or(false);
            let stamp = if is_synthetics {
                crate::reservoir::Stamp::priority(&mut rng)
            } else {
                crate::reservoir::Stamp::ordinary(&mut rng)
            };
            harvest.error_events.0.add(stamp, event.clone());
        }
    }
}

fn parse_rename_rules(reply: &Value) -> Vec<RenameRule> {
    let Some(rules) = reply.get("metric_name_rules").and_then(Value::as_array) else {
        return Vec::new();
    };
    rules
        .iter()
        .filter_map(|r| {
            let match_name = r.get("match_expression").and_then(Value::as_str)?.to_owned();
            Some(RenameRule {
                match_name,
                match_scope: r.get("match_scope").and_then(Value::as_str).map(str::to_owned),
                replacement: r.get("replacement").and_then(Value::as_str).map(str::to_owned),
                terminal: r.get("terminate_chain").and_then(Value::as_bool).unwrap_or(true),
            })
        })
        .collect()
}

#[derive(serde::Deserialize)]
struct OverrideEntry {
    license_hash: String,
    default_secs: u64,
    txn_events_secs: u64,
    custom_events_secs: u64,
    error_events_secs: u64,
}

fn load_trigger_overrides(config: &DaemonConfig) -> anyhow::Result<HashMap<String, TriggerPattern>> {
    let Some(path) = &config.trigger_overrides else {
        return Ok(HashMap::new());
    };
    let contents = std::fs::read_to_string(path)?;
    let entries: Vec<OverrideEntry> = serde_json::from_str(&contents)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            (
                e.license_hash,
                TriggerPattern::PerKind {
                    default: Duration::from_secs(e.default_secs),
                    txn_events: Duration::from_secs(e.txn_events_secs),
                    custom_events: Duration::from_secs(e.custom_events_secs),
                    error_events: Duration::from_secs(e.error_events_secs),
                },
            )
        })
        .collect())
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
