// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nrd: local telemetry aggregation daemon. Agents speak a small
//! length-prefixed binary protocol over a Unix-domain socket; nrd
//! batches their data into harvests and relays each one to the New
//! Relic collector on its own schedule (§1, §2).

pub mod app;
pub mod app_harvest;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod error_heap;
pub mod harvest;
pub mod harvest_trigger;
pub mod harvest_worker;
pub mod listener;
pub mod metric_table;
pub mod payload;
pub mod processor;
pub mod protocol;
pub mod reservoir;
pub mod slow_sql;
pub mod txn_trace;
pub mod utilization;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::processor::Processor;

/// Run the daemon until a termination signal arrives or the listener
/// fails. Owns the top-level wiring: one inbound channel from the
/// listener to the processor, one cancellation token both race against.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    spawn_signal_handler(shutdown.clone());

    let processor = Processor::new(config.clone(), inbound_rx, shutdown.clone(), None)?;
    let processor_handle = tokio::spawn(processor.run());

    tracing::info!(socket = %config.socket, "nrd listening");
    let result = listener::serve(&config.socket, inbound_tx, shutdown.clone()).await;

    shutdown.cancel();
    let _ = processor_handle.await;
    result
}

/// First SIGTERM/SIGINT requests graceful shutdown; a second forces exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
