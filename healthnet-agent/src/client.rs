//! Kernel API client
//!
//! Request construction helpers and the two calls the agent makes:
//! registration and heartbeat. HTTP status codes are mapped to a small
//! closed set of outcomes; anything else is an error.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Status reported in a heartbeat (matches the kernel wire format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Error,
    Shutdown,
    Restart,
    Other,
}

/// Registration request body
#[derive(Debug, Serialize)]
pub struct RegistrationRequest {
    pub client_name: String,
    pub interval: u64,
}

impl RegistrationRequest {
    pub fn new(client_name: &str, interval_secs: u64) -> Self {
        Self {
            client_name: client_name.to_string(),
            interval: interval_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    machine_id: Uuid,
}

/// Heartbeat request body
#[derive(Debug, Serialize)]
pub struct HeartbeatRequest {
    pub machine_id: Uuid,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(Uuid),
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Accepted,
    UnknownClient,
}

pub struct KernelClient {
    http: reqwest::Client,
    base_url: String,
}

impl KernelClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn register(&self, request: &RegistrationRequest) -> Result<RegisterOutcome> {
        let response = self
            .http
            .post(self.url("/register"))
            .json(request)
            .send()
            .await
            .context("Failed to send registration")?;

        match response.status() {
            StatusCode::OK => {
                let body: RegistrationResponse = response.json().await.context("Invalid registration response")?;
                Ok(RegisterOutcome::Registered(body.machine_id))
            }
            StatusCode::CONFLICT => Ok(RegisterOutcome::AlreadyRegistered),
            other => bail!("Registration rejected: {}", describe(other, response).await),
        }
    }

    pub async fn heartbeat(&self, machine_id: Uuid, status: Status) -> Result<HeartbeatOutcome> {
        let response = self
            .http
            .post(self.url("/heartbeat"))
            .json(&HeartbeatRequest { machine_id, status })
            .send()
            .await
            .context("Failed to send heartbeat")?;

        match response.status() {
            StatusCode::OK => Ok(HeartbeatOutcome::Accepted),
            StatusCode::NOT_FOUND => Ok(HeartbeatOutcome::UnknownClient),
            other => bail!("Heartbeat rejected: {}", describe(other, response).await),
        }
    }
}

async fn describe(status: StatusCode, response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status} {body}")
    }
}
