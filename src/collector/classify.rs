// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps a collector HTTP response to the closed error enums the
//! processor's state machine switches on (§4.2, §4.6, §4.7).
//!
//! Grounded on `examples/original_source/src/newrelic/collector.go`'s
//! exception-name dispatch table; reduced here to the handful of
//! outcomes this daemon actually branches on.

use reqwest::StatusCode;
use serde_json::Value;

use crate::collector::client::RawResponse;
use crate::error::{ClassifiedError, ConnectError};

const FORCE_RESTART: &str = "NewRelic::Agent::ForceRestartException";
const FORCE_DISCONNECT: &str = "NewRelic::Agent::ForceDisconnectException";
const LICENSE_INVALID: &str = "NewRelic::Agent::LicenseException";

fn exception_type(body: &Value) -> Option<&str> {
    body.get("exception")?.get("error_type")?.as_str()
}

/// Classify the response to a harvest-dispatch call (§4.7).
pub fn classify_harvest(resp: &RawResponse) -> Result<Value, ClassifiedError> {
    match resp.status {
        StatusCode::OK => match resp.json() {
            Some(body) => match exception_type(&body) {
                Some(FORCE_RESTART) => Err(ClassifiedError::RestartRequired),
                Some(FORCE_DISCONNECT) => Err(ClassifiedError::Disconnect),
                Some(LICENSE_INVALID) => Err(ClassifiedError::LicenseInvalid),
                Some(_) => Err(ClassifiedError::Other),
                None => Ok(body.get("return_value").cloned().unwrap_or(Value::Null)),
            },
            None => Err(ClassifiedError::Other),
        },
        StatusCode::PAYLOAD_TOO_LARGE => Err(ClassifiedError::PayloadTooLarge),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => Err(ClassifiedError::UnsupportedMedia),
        StatusCode::GONE => Err(ClassifiedError::RestartRequired),
        _ => Err(ClassifiedError::Other),
    }
}

/// Classify the response to a redirect/connect call (§4.2).
pub fn classify_connect(resp: &RawResponse) -> Result<Value, ConnectError> {
    match resp.status {
        StatusCode::OK => match resp.json() {
            Some(body) => match exception_type(&body) {
                Some(LICENSE_INVALID) => Err(ConnectError::LicenseInvalid),
                Some(FORCE_DISCONNECT) => Err(ConnectError::Disconnect),
                Some(_) => Err(ConnectError::Other),
                None => Ok(body.get("return_value").cloned().unwrap_or(Value::Null)),
            },
            None => Err(ConnectError::Other),
        },
        _ => Err(ConnectError::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn resp(status: StatusCode, json: Value) -> RawResponse {
        RawResponse { status, bytes: Bytes::from(serde_json::to_vec(&json).unwrap()) }
    }

    #[test]
    fn classifies_return_value() {
        let r = resp(StatusCode::OK, serde_json::json!({"return_value": 42}));
        assert_eq!(classify_harvest(&r).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn classifies_force_restart() {
        let r = resp(
            StatusCode::OK,
            serde_json::json!({"exception": {"error_type": FORCE_RESTART, "message": "restart"}}),
        );
        assert!(matches!(classify_harvest(&r), Err(ClassifiedError::RestartRequired)));
    }

    #[test]
    fn classifies_payload_too_large_by_status() {
        let r = resp(StatusCode::PAYLOAD_TOO_LARGE, Value::Null);
        assert!(matches!(classify_harvest(&r), Err(ClassifiedError::PayloadTooLarge)));
    }

    #[test]
    fn connect_classifies_license_invalid() {
        let r = resp(
            StatusCode::OK,
            serde_json::json!({"exception": {"error_type": LICENSE_INVALID, "message": "bad key"}}),
        );
        assert!(matches!(classify_connect(&r), Err(ConnectError::LicenseInvalid)));
    }
}
