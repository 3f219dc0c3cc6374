//! Agent session service client: create, poll, message, and delete the
//! autonomous coding sessions that scope and fix issues.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use scout_core::{SessionKind, SessionSnapshot};

#[derive(Debug, Error)]
/// Failure taxonomy for the agent service boundary. Callers match on this
/// to pick between reschedule, banner, and expiry handling.
pub enum AgentApiError {
    #[error("agent service authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },
    #[error("agent session not found: {0}")]
    NotFound(String),
    #[error("agent service transport error: {0}")]
    Transport(String),
    #[error("agent service returned a malformed payload: {0}")]
    Malformed(String),
}

impl AgentApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Handle returned by session creation. The URL is only meaningful at
/// creation time.
pub struct SessionHandle {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
/// Capability interface the reconciliation core depends on; concrete
/// transport stays behind it.
pub trait AgentSessionApi: Send + Sync {
    async fn create_session(
        &self,
        prompt: &str,
        kind: SessionKind,
        acu_limit: Option<u32>,
    ) -> Result<SessionHandle, AgentApiError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, AgentApiError>;

    async fn send_message(&self, session_id: &str, text: &str) -> Result<(), AgentApiError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), AgentApiError>;
}

#[derive(Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    api_base: String,
}

impl HttpAgentClient {
    pub fn new(api_base: &str, token: &str, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("scout-triage-bridge"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid agent service authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create agent service client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AgentApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| AgentApiError::Transport(format!("{operation}: {error}")))?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|error| {
                AgentApiError::Malformed(format!("failed to decode {operation}: {error}"))
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(operation, status.as_u16(), &body))
    }

    async fn request_unit(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), AgentApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| AgentApiError::Transport(format!("{operation}: {error}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(operation, status.as_u16(), &body))
    }
}

fn classify_status(operation: &str, status: u16, body: &str) -> AgentApiError {
    let message = format!("{operation}: {}", truncate_for_error(body, 400));
    match status {
        401 | 403 => AgentApiError::Auth { status, message },
        404 => AgentApiError::NotFound(message),
        _ => AgentApiError::Transport(format!("status {status}, {message}")),
    }
}

fn truncate_for_error(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let truncated: String = body.chars().take(limit).collect();
    format!("{truncated}…")
}

#[async_trait]
impl AgentSessionApi for HttpAgentClient {
    async fn create_session(
        &self,
        prompt: &str,
        kind: SessionKind,
        acu_limit: Option<u32>,
    ) -> Result<SessionHandle, AgentApiError> {
        let mut payload = json!({
            "prompt": prompt,
            "kind": kind.as_str(),
        });
        if let Some(limit) = acu_limit {
            payload["acu_limit"] = json!(limit);
        }
        self.request_json(
            "create session",
            self.http
                .post(format!("{}/sessions", self.api_base))
                .json(&payload),
        )
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, AgentApiError> {
        self.request_json(
            "get session",
            self.http
                .get(format!("{}/sessions/{session_id}", self.api_base)),
        )
        .await
    }

    async fn send_message(&self, session_id: &str, text: &str) -> Result<(), AgentApiError> {
        self.request_unit(
            "send session message",
            self.http
                .post(format!("{}/sessions/{session_id}/messages", self.api_base))
                .json(&json!({ "text": text })),
        )
        .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), AgentApiError> {
        self.request_unit(
            "delete session",
            self.http
                .delete(format!("{}/sessions/{session_id}", self.api_base)),
        )
        .await
    }
}
