// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routes a decoded message to the processor and, for `App` messages,
//! waits for its synchronous reply (§4.5, §4.7).
//!
//! The listener owns one `Dispatcher` per accepted connection; it never
//! touches processor state directly — every decision is made by the
//! single-threaded event loop behind `inbound_tx`.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::app::{AppInfo, AppState};
use crate::error::ProtocolError;
use crate::harvest::RunId;
use crate::protocol::{self, DecodedMessage};

/// One decoded inbound event, paired with however the sender expects
/// to hear back.
pub enum Inbound {
    AppInfo { run_id: Option<RunId>, info: AppInfo, reply_tx: oneshot::Sender<AppInfoReply> },
    TxnData { run_id: Option<RunId>, opaque: Bytes },
}

/// Mirrors §4.7's three reply shapes exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum AppInfoReply {
    RunIdValid,
    Connected { connect_reply: Bytes },
    State(AppState),
}

impl AppInfoReply {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::RunIdValid => serde_json::json!({"runIDValid": true}),
            Self::Connected { connect_reply } => {
                let parsed: serde_json::Value =
                    serde_json::from_slice(connect_reply).unwrap_or(serde_json::Value::Null);
                serde_json::json!({"state": "Connected", "connectReply": parsed})
            }
            Self::State(state) => serde_json::json!({"state": format!("{state:?}")}),
        }
    }
}

/// Decode `body` and forward it to the processor. Returns the
/// JSON-encoded synchronous reply for `App` messages; `None` for
/// messages that produce no reply (§4.5: None/AppReply are ignored,
/// Transaction is fire-and-forget, unknown tags are protocol errors
/// with the connection kept open).
pub async fn dispatch(
    body: Bytes,
    inbound_tx: &tokio::sync::mpsc::UnboundedSender<Inbound>,
) -> Result<Option<serde_json::Value>, ProtocolError> {
    match protocol::decode(body)? {
        DecodedMessage::None | DecodedMessage::AppReply => Ok(None),
        DecodedMessage::App { info, run_id } => {
            let (reply_tx, reply_rx) = oneshot::channel();
            if inbound_tx.send(Inbound::AppInfo { run_id, info, reply_tx }).is_err() {
                return Ok(None);
            }
            match reply_rx.await {
                Ok(reply) => Ok(Some(reply.to_json())),
                Err(_) => Ok(None),
            }
        }
        DecodedMessage::Transaction { run_id, opaque } => {
            let _ = inbound_tx.send(Inbound::TxnData { run_id, opaque });
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_valid_reply_shape() {
        let v = AppInfoReply::RunIdValid.to_json();
        assert_eq!(v, serde_json::json!({"runIDValid": true}));
    }

    #[test]
    fn connected_reply_embeds_raw_connect_reply() {
        let v = AppInfoReply::Connected { connect_reply: Bytes::from_static(b"{\"agent_run_id\":\"r1\"}") }
            .to_json();
        assert_eq!(v["state"], "Connected");
        assert_eq!(v["connectReply"]["agent_run_id"], "r1");
    }

    #[test]
    fn unknown_state_reply_shape() {
        let v = AppInfoReply::State(AppState::Unknown).to_json();
        assert_eq!(v["state"], "Unknown");
    }
}
