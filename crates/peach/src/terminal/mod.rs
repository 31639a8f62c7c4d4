//! Terminal session initiation.
//!
//! A terminal relay needs a process id issued by the pod's terminal service.
//! [`TerminalClient`] asks the pod to spawn a shell and hands back that id.

use std::time::Duration;

use anyhow::Context;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::Environment;

/// Terminal service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Seconds to wait for `POST /init` on the pod.
    pub init_timeout_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("environment {0} has no pod address")]
    NotProvisioned(String),

    #[error("terminal init request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("terminal init returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("terminal init response has no pid")]
    MissingPid,
}

/// HTTP client for the pod-side terminal service.
#[derive(Debug, Clone)]
pub struct TerminalClient {
    http: reqwest::Client,
    port: u16,
}

impl TerminalClient {
    pub fn new(config: &TerminalConfig, port: u16) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.init_timeout_secs))
            .build()
            .context("building terminal HTTP client")?;
        Ok(Self { http, port })
    }

    /// Ask the environment's pod to start a terminal and return its pid.
    pub async fn init_terminal(&self, environment: &Environment) -> Result<String, TerminalError> {
        let address = environment
            .internal_address
            .as_deref()
            .ok_or_else(|| TerminalError::NotProvisioned(environment.environment_id.clone()))?;

        let url = format!("http://{}:{}/init", address, self.port);
        debug!("Initializing terminal via {}", url);

        let response = self.http.post(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Terminal init at {} returned {}: {}", url, status, body);
            return Err(TerminalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await?;
        parse_pid(&body).ok_or(TerminalError::MissingPid)
    }
}

/// Accept `pid` as a non-empty string or a non-negative integer.
fn parse_pid(body: &serde_json::Value) -> Option<String> {
    match body.get("pid")? {
        serde_json::Value::String(pid) if !pid.trim().is_empty() => Some(pid.trim().to_string()),
        serde_json::Value::Number(pid) => pid.as_u64().map(|pid| pid.to_string()),
        _ => None,
    }
}
