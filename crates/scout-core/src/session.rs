//! Wire types for agent-service session snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SessionStatus` values reported by the agent service.
pub enum SessionStatus {
    Working,
    Blocked,
    Finished,
    Stopped,
    Expired,
    SuspendRequested,
    Resumed,
    /// Forward-compatible catch-all; a status string this build does not
    /// recognize must not fail the whole snapshot fetch.
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Expired => "expired",
            Self::SuspendRequested => "suspend_requested",
            Self::Resumed => "resumed",
            Self::Unknown => "unknown",
        }
    }
}

/// True only for statuses the agent service will never leave on its own.
pub fn is_terminal(status: SessionStatus) -> bool {
    matches!(
        status,
        SessionStatus::Finished | SessionStatus::Stopped | SessionStatus::Expired
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SessionKind` values.
pub enum SessionKind {
    Scoping,
    Fixing,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scoping => "scoping",
            Self::Fixing => "fixing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One entry of the session's message transcript.
pub struct SessionMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPullRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Immutable-per-fetch snapshot of one agent session. The core only reads
/// this; the agent service owns it.
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default = "default_status_enum")]
    pub status_enum: SessionStatus,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pull_request: Option<SessionPullRequest>,
    #[serde(default)]
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

fn default_status_enum() -> SessionStatus {
    SessionStatus::Unknown
}

impl SessionSnapshot {
    /// Most recent message not authored by the human user. Message roles are
    /// free-form strings on the wire, so anything other than `user` counts
    /// as agent-authored.
    pub fn latest_agent_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role != "user" && !message.text.trim().is_empty())
            .map(|message| message.text.as_str())
    }
}
