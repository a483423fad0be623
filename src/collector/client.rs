// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bare HTTP wrapper for one collector host (§4.2, §4.7).
//!
//! Grounded on `upstream/client.rs`'s `UpstreamClient`: a small struct
//! owning a `reqwest::Client`, a `url()` helper, and one `post_json`-ish
//! method other layers build protocol on top of. The collector's wire
//! format differs (query-string method dispatch, `license_key`,
//! optional `run_id`) but the shape — one client, one timeout, JSON in
//! and out — is the same.

use serde_json::Value;

use crate::harvest::RunId;

pub struct CollectorClient {
    scheme: &'static str,
    host: String,
    http: reqwest::Client,
}

impl CollectorClient {
    pub fn new(scheme: &'static str, host: String, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { scheme, host, http }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Point this client at a new host without rebuilding the
    /// underlying `reqwest::Client` (§4.2: the redirect phase hands
    /// back the real collector host to connect to next).
    pub fn retarget(&mut self, host: String) {
        self.host = host;
    }

    fn url(&self, method: &str, license_key: &str, run_id: Option<&RunId>) -> String {
        let mut url = format!(
            "{}://{}/agent_listener/invoke_raw_method?marshal_format=json&protocol_version=14&method={method}&license_key={license_key}",
            self.scheme, self.host
        );
        if let Some(run_id) = run_id {
            url.push_str(&format!("&run_id={run_id}"));
        }
        url
    }

    /// Invoke one named collector method. Returns the raw JSON response
    /// body; the caller classifies success/failure (§4.2 "Collector
    /// methods return one JSON envelope with either `return_value` or
    /// `exception`").
    pub async fn invoke(
        &self,
        method: &str,
        license_key: &str,
        run_id: Option<&RunId>,
        body: &Value,
    ) -> Result<RawResponse, reqwest::Error> {
        let resp = self.http.post(self.url(method, license_key, run_id)).json(body).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        Ok(RawResponse { status, bytes })
    }
}

pub struct RawResponse {
    pub status: reqwest::StatusCode,
    pub bytes: bytes::Bytes,
}

impl RawResponse {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_run_id_when_present() {
        let client = CollectorClient::new("https", "collector.newrelic.com".into(), std::time::Duration::from_secs(1));
        let url = client.url("metric_data", "abc123", Some(&RunId("run-1".into())));
        assert!(url.contains("method=metric_data"));
        assert!(url.contains("license_key=abc123"));
        assert!(url.contains("run_id=run-1"));
    }

    #[test]
    fn url_omits_run_id_when_absent() {
        let client = CollectorClient::new("https", "collector.newrelic.com".into(), std::time::Duration::from_secs(1));
        let url = client.url("get_redirect_host", "abc123", None);
        assert!(!url.contains("run_id"));
    }

    #[test]
    fn retarget_changes_subsequent_urls() {
        let mut client = CollectorClient::new("https", "collector.newrelic.com".into(), std::time::Duration::from_secs(1));
        client.retarget("collector-3.newrelic.com".into());
        assert_eq!(client.host(), "collector-3.newrelic.com");
    }
}
