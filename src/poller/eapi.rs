use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{CommandRunner, QueryError};
use crate::config::Credentials;
use crate::utils::truncate_lines;

/// Arista eAPI (JSON-RPC over HTTPS) client
pub struct EapiClient {
    client: Client,
    credentials: Credentials,
}

#[derive(Serialize)]
struct RunCmdsRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: RunCmdsParams<'a>,
    id: &'static str,
}

#[derive(Serialize)]
struct RunCmdsParams<'a> {
    version: u32,
    cmds: Vec<&'a str>,
    format: &'a str,
}

#[derive(Deserialize)]
struct RunCmdsResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl EapiClient {
    pub fn new(credentials: Credentials, timeout_secs: u64) -> Result<Self> {
        // Production switches almost always serve eAPI with a self-signed certificate
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client, credentials })
    }

    fn api_url(&self, device: &str) -> String {
        format!("https://{}/command-api", device)
    }

    /// Run `enable` followed by `command`, returning the command's result object
    async fn run_cmd(&self, device: &str, command: &str, format: &str) -> Result<Value, QueryError> {
        let body = RunCmdsRequest {
            jsonrpc: "2.0",
            method: "runCmds",
            params: RunCmdsParams {
                version: 1,
                cmds: vec!["enable", command],
                format,
            },
            id: "ptov-lab",
        };

        let resp = self
            .client
            .post(self.api_url(device))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Unreachable(format!("eAPI request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(QueryError::Auth(format!("eAPI returned {}", status)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| QueryError::Unreachable(format!("failed to read eAPI response: {}", e)))?;

        if !status.is_success() {
            return Err(QueryError::Malformed(format!(
                "eAPI returned {}: {}",
                status,
                truncate_lines(&text, 5)
            )));
        }

        // One result per command; ours is the one after `enable`
        let mut results = parse_run_cmds_response(&text)?;
        if results.len() < 2 {
            return Err(QueryError::Malformed(format!("eAPI returned no result for `{}`", command)));
        }
        Ok(results.swap_remove(1))
    }
}

/// Decode a runCmds response body into its per-command results
pub fn parse_run_cmds_response(body: &str) -> Result<Vec<Value>, QueryError> {
    let resp: RunCmdsResponse = serde_json::from_str(body)
        .map_err(|e| QueryError::Malformed(format!("undecodable eAPI response: {}", e)))?;

    if let Some(err) = resp.error {
        return Err(QueryError::Malformed(format!("eAPI error {}: {}", err.code, err.message)));
    }

    resp.result
        .ok_or_else(|| QueryError::Malformed("eAPI response carried neither result nor error".to_string()))
}

#[async_trait]
impl CommandRunner for EapiClient {
    async fn run_json(&self, device: &str, command: &str) -> Result<Value, QueryError> {
        self.run_cmd(device, command, "json").await
    }

    async fn run_text(&self, device: &str, command: &str) -> Result<String, QueryError> {
        let result = self.run_cmd(device, command, "text").await?;
        result
            .get("output")
            .and_then(|o| o.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| QueryError::Malformed(format!("`{}` text output missing", command)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_cmds_response_result() {
        let body = r#"{"jsonrpc": "2.0", "id": "ptov-lab", "result": [{}, {"version": "4.28.3M"}]}"#;
        let results = parse_run_cmds_response(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["version"], "4.28.3M");
    }

    #[test]
    fn test_parse_run_cmds_response_error() {
        let body = r#"{"jsonrpc": "2.0", "id": "ptov-lab", "error": {"code": 1002, "message": "CLI command 2 of 2 'show lldp neighbor' failed: invalid command", "data": []}}"#;
        let err = parse_run_cmds_response(body).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(ref m) if m.contains("1002")));
    }

    #[test]
    fn test_parse_run_cmds_response_garbage() {
        assert!(matches!(parse_run_cmds_response("<html>"), Err(QueryError::Malformed(_))));
        assert!(matches!(parse_run_cmds_response("{}"), Err(QueryError::Malformed(_))));
    }
}
