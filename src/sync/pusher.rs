//! Downstream push capability.
//!
//! # Responsibilities
//! - Issue update (POST) and delete (DELETE) calls to downstream services
//! - Wrap any non-2xx response in a structured error so callers can
//!   distinguish "already absent" from genuine failures
//!
//! # Design Decisions
//! - Fixed per-request timeout configured at construction
//! - A file-output variant records payloads instead of pushing, for
//!   offline inspection

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path as FsPath;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Structured error from a downstream push.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("{op} {endpoint} failed: {status} {status_text}")]
    Status {
        endpoint: String,
        op: String,
        status: u16,
        status_text: String,
    },

    #[error("{op} {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        op: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("writing {endpoint} payload to output file failed: {source}")]
    Output {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl PushError {
    /// True for a 404, which delete callers treat as already satisfied.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PushError::Status { status: 404, .. })
    }
}

/// Capability to push derived configuration downstream.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push_update(&self, endpoint: &str, body: &Value) -> Result<(), PushError>;
    async fn push_delete(&self, endpoint: &str) -> Result<(), PushError>;
}

/// HTTP pusher over reqwest with a fixed timeout.
pub struct HttpPusher {
    client: reqwest::Client,
}

impl HttpPusher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn check_status(endpoint: &str, op: &str, response: &reqwest::Response) -> Result<(), PushError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(PushError::Status {
            endpoint: endpoint.to_string(),
            op: op.to_string(),
            status: status.as_u16(),
            status_text: status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        })
    }
}

#[async_trait]
impl Pusher for HttpPusher {
    async fn push_update(&self, endpoint: &str, body: &Value) -> Result<(), PushError> {
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|source| PushError::Transport {
                endpoint: endpoint.to_string(),
                op: "POST".to_string(),
                source,
            })?;
        Self::check_status(endpoint, "POST", &response)
    }

    async fn push_delete(&self, endpoint: &str) -> Result<(), PushError> {
        let response = self
            .client
            .delete(endpoint)
            .send()
            .await
            .map_err(|source| PushError::Transport {
                endpoint: endpoint.to_string(),
                op: "DELETE".to_string(),
                source,
            })?;
        Self::check_status(endpoint, "DELETE", &response)
    }
}

/// Pusher that appends payloads to a file instead of calling downstream.
pub struct FilePusher {
    file: Mutex<File>,
}

impl FilePusher {
    pub fn create(path: &FsPath) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_line(&self, endpoint: &str, line: &Value) -> Result<(), PushError> {
        let mut file = self.file.lock().expect("output file poisoned");
        writeln!(file, "{}", line).map_err(|source| PushError::Output {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Pusher for FilePusher {
    async fn push_update(&self, endpoint: &str, body: &Value) -> Result<(), PushError> {
        self.write_line(
            endpoint,
            &serde_json::json!({"op": "update", "endpoint": endpoint, "body": body}),
        )
    }

    async fn push_delete(&self, endpoint: &str) -> Result<(), PushError> {
        self.write_line(
            endpoint,
            &serde_json::json!({"op": "delete", "endpoint": endpoint}),
        )
    }
}

/// Pusher used when posting is disabled; logs and succeeds.
pub struct DisabledPusher;

#[async_trait]
impl Pusher for DisabledPusher {
    async fn push_update(&self, endpoint: &str, _body: &Value) -> Result<(), PushError> {
        tracing::debug!(endpoint = %endpoint, "posting disabled, skipping update");
        Ok(())
    }

    async fn push_delete(&self, endpoint: &str) -> Result<(), PushError> {
        tracing::debug!(endpoint = %endpoint, "posting disabled, skipping delete");
        Ok(())
    }
}
