// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-phase connect handshake: `preconnect` resolves the real
//! collector host, then `connect` registers the app and returns a
//! `RunId` plus the reply blob forwarded verbatim to agents (§4.2).

use serde_json::Value;

use crate::app::AppInfo;
use crate::collector::classify::classify_connect;
use crate::collector::client::CollectorClient;
use crate::error::ConnectError;
use crate::harvest::RunId;

pub struct ConnectOutcome {
    pub run_id: RunId,
    /// The full JSON reply, forwarded byte-for-byte to the agent that
    /// asks "am I connected" (§4.7 AppReply contract).
    pub reply: Value,
}

/// Runs `preconnect` then `connect` against `client`, retargeting it to
/// the redirected host in between. On success the caller installs
/// `outcome.run_id` on the `App` and transitions it to `Connected`.
pub async fn connect(
    client: &mut CollectorClient,
    license_key: &str,
    info: &AppInfo,
    utilization: Value,
) -> Result<ConnectOutcome, ConnectError> {
    let redirect = client
        .invoke("get_redirect_host", license_key, None, &serde_json::json!([]))
        .await
        .map_err(|_| ConnectError::Other)?;
    let redirected = classify_connect(&redirect)?;

    if let Some(host) = redirected.as_str() {
        client.retarget(host.to_owned());
    }

    let body = serde_json::json!([{
        "agent_version": info.agent_version,
        "app_name": [info.key.app_name],
        "host": info.host_display_name,
        "language": info.key.language,
        "high_security": info.key.high_security,
        "settings": serde_json::from_slice::<Value>(&info.settings).unwrap_or(Value::Null),
        "environment": serde_json::from_slice::<Value>(&info.environment).unwrap_or(Value::Null),
        "labels": serde_json::from_slice::<Value>(&info.labels).unwrap_or(Value::Null),
        "utilization": utilization,
    }]);

    let connected = client
        .invoke("connect", license_key, None, &body)
        .await
        .map_err(|_| ConnectError::Other)?;
    let reply = classify_connect(&connected)?;

    let run_id = reply
        .get("agent_run_id")
        .and_then(Value::as_str)
        .map(|s| RunId(s.to_owned()))
        .ok_or(ConnectError::Other)?;

    Ok(ConnectOutcome { run_id, reply })
}
