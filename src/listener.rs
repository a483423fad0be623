// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-domain-socket accept loop and per-connection framing (§4.4, §6
//! "Agent ↔ daemon").
//!
//! Grounded on `upstream/poller.rs`'s interval-plus-cancel task shape
//! for the accept loop's backoff, generalized from a fixed tick to an
//! exponential one. One task per accepted connection, each independent
//! and panic-contained — a misbehaving agent can only take down its own
//! connection.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{self, Inbound};
use crate::protocol::{self, FrameHeader, MessageType, FRAME_HEADER_LEN, LEGACY_MISMATCH_REPLY};

const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Binds `path` (a filesystem path, or `@name` for Linux's
/// abstract-namespace flavor) and accepts connections until `cancel`
/// fires. Each connection is handled on its own task.
pub async fn serve(
    path: &str,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind(path)?;
    let mut backoff = MIN_BACKOFF;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        backoff = MIN_BACKOFF;
                        let tx = inbound_tx.clone();
                        let conn_cancel = cancel.clone();
                        let handle = tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, tx, conn_cancel).await {
                                tracing::debug!(err = %e, "connection closed");
                            }
                        });
                        tokio::spawn(async move {
                            if let Err(e) = handle.await {
                                if e.is_panic() {
                                    tracing::error!(err = %e, "connection task panicked");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, backoff_ms = backoff.as_millis(), "accept error");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn bind(path: &str) -> anyhow::Result<UnixListener> {
    if let Some(name) = path.strip_prefix('@') {
        #[cfg(target_os = "linux")]
        {
            use std::os::linux::net::SocketAddrExt;
            use std::os::unix::net::SocketAddr;

            let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
            let std_listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
            std_listener.set_nonblocking(true)?;
            return Ok(UnixListener::from_std(std_listener)?);
        }
        #[cfg(not(target_os = "linux"))]
        {
            anyhow::bail!("abstract-namespace sockets require Linux, got path {name}");
        }
    }

    let _ = std::fs::remove_file(path);
    // Relax the creation mask around bind so any local agent process can
    // connect, then restore it (§4.4 "ensure the socket file is
    // world-accessible by manipulating the creation mask around bind").
    let previous = nix::sys::stat::umask(nix::sys::stat::Mode::empty());
    let result = UnixListener::bind(path);
    nix::sys::stat::umask(previous);
    Ok(result?)
}

async fn handle_connection(
    mut stream: UnixStream,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut header_buf = [0u8; FRAME_HEADER_LEN];
    let mut first = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = stream.read_exact(&mut header_buf) => {
                result?;
            }
        }

        if first {
            first = false;
            let first_six: [u8; 6] = header_buf[0..6].try_into().unwrap_or([0; 6]);
            if protocol::is_legacy_header(&first_six) {
                stream.write_all(&LEGACY_MISMATCH_REPLY).await?;
                return Ok(());
            }
        }

        let header = match FrameHeader::decode(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(err = %e, "oversize frame, closing connection");
                return Ok(());
            }
        };

        let mut body = BytesMut::zeroed(header.body_len as usize);
        stream.read_exact(&mut body).await?;
        let body = body.freeze();

        if header.message_type != MessageType::Binary {
            continue;
        }

        match dispatcher::dispatch(body, &inbound_tx).await {
            Ok(Some(reply)) => {
                let payload = serde_json::to_vec(&reply).unwrap_or_default();
                write_frame(&mut stream, MessageType::Json, Bytes::from(payload)).await?;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(err = %e, "protocol error, keeping connection open");
            }
        }
    }
}

async fn write_frame(stream: &mut UnixStream, message_type: MessageType, body: Bytes) -> anyhow::Result<()> {
    let header = FrameHeader { body_len: body.len() as u32, message_type };
    stream.write_all(&header.encode()).await?;
    stream.write_all(&body).await?;
    Ok(())
}
