//! Durable issue-row store, specified at its interface boundary: an
//! idempotent merge keyed by repo plus issue number, with lookups by repo
//! and by session id. The file-backed implementation keeps one JSON state
//! document written atomically, tolerating a corrupt file by starting fresh.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use scout_core::{Confidence, IssueStatus};

pub const STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// One persisted row per repo + issue number.
pub struct IssueRow {
    pub repo: String,
    pub issue_number: u64,
    #[serde(default)]
    pub status: Option<IssueStatus>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub scoping_session_id: Option<String>,
    #[serde(default)]
    pub scoping_session_started_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub fixing_session_id: Option<String>,
    #[serde(default)]
    pub fixing_session_started_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub last_agent_comment_id: Option<u64>,
    #[serde(default)]
    pub last_agent_comment_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub github_comment_url: Option<String>,
    #[serde(default)]
    pub updated_at_unix_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Partial fields merged into a row by `upsert_issue_row`. `None` leaves the
/// stored value untouched, so repeated application is idempotent.
pub struct IssueRowPatch {
    pub status: Option<IssueStatus>,
    pub confidence: Option<Confidence>,
    pub scoping_session_id: Option<String>,
    pub scoping_session_started_at_unix_ms: Option<u64>,
    pub fixing_session_id: Option<String>,
    pub fixing_session_started_at_unix_ms: Option<u64>,
    pub last_agent_comment_id: Option<u64>,
    pub last_agent_comment_at_unix_ms: Option<u64>,
    pub github_comment_url: Option<String>,
}

/// Capability interface for the durable store.
pub trait IssueRowStore: Send + Sync {
    fn upsert_issue_row(&self, repo: &str, issue_number: u64, patch: &IssueRowPatch)
        -> Result<()>;

    fn rows_by_repo(&self, repo: &str) -> Result<Vec<IssueRow>>;

    /// Checked against both the scoping-session and fixing-session id fields.
    fn row_by_session_id(&self, session_id: &str) -> Result<Option<IssueRow>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    schema_version: u32,
    #[serde(default)]
    rows: BTreeMap<String, IssueRow>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            rows: BTreeMap::new(),
        }
    }
}

pub struct JsonFileIssueStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

fn row_key(repo: &str, issue_number: u64) -> String {
    format!("{}#{issue_number}", repo.trim().to_lowercase())
}

fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Writes text using a temp file + rename so readers never observe partial
/// data.
fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("issue-store"),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

impl JsonFileIssueStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read issue store {}", path.display()))?;
            match serde_json::from_str::<StoreState>(&raw) {
                Ok(state) if state.schema_version == STORE_SCHEMA_VERSION => state,
                Ok(state) => {
                    tracing::warn!(
                        found = state.schema_version,
                        expected = STORE_SCHEMA_VERSION,
                        "unsupported issue store schema, starting fresh"
                    );
                    StoreState::default()
                }
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "failed to parse issue store, starting fresh"
                    );
                    StoreState::default()
                }
            }
        } else {
            StoreState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn save_locked(&self, state: &StoreState) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(state).context("failed to serialize issue store")?;
        write_text_atomic(&self.path, &serialized)
    }
}

impl IssueRowStore for JsonFileIssueStore {
    fn upsert_issue_row(
        &self,
        repo: &str,
        issue_number: u64,
        patch: &IssueRowPatch,
    ) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("issue store mutex poisoned"))?;
        let key = row_key(repo, issue_number);
        let row = state.rows.entry(key).or_insert_with(|| IssueRow {
            repo: repo.trim().to_lowercase(),
            issue_number,
            ..IssueRow::default()
        });
        if let Some(status) = patch.status {
            row.status = Some(status);
        }
        if let Some(confidence) = patch.confidence {
            row.confidence = Some(confidence);
        }
        if let Some(id) = &patch.scoping_session_id {
            row.scoping_session_id = Some(id.clone());
        }
        if let Some(at) = patch.scoping_session_started_at_unix_ms {
            row.scoping_session_started_at_unix_ms = Some(at);
        }
        if let Some(id) = &patch.fixing_session_id {
            row.fixing_session_id = Some(id.clone());
        }
        if let Some(at) = patch.fixing_session_started_at_unix_ms {
            row.fixing_session_started_at_unix_ms = Some(at);
        }
        if let Some(id) = patch.last_agent_comment_id {
            row.last_agent_comment_id = Some(id);
        }
        if let Some(at) = patch.last_agent_comment_at_unix_ms {
            row.last_agent_comment_at_unix_ms = Some(at);
        }
        if let Some(url) = &patch.github_comment_url {
            row.github_comment_url = Some(url.clone());
        }
        row.updated_at_unix_ms = current_unix_timestamp_ms();
        self.save_locked(&state)
    }

    fn rows_by_repo(&self, repo: &str) -> Result<Vec<IssueRow>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("issue store mutex poisoned"))?;
        let wanted = repo.trim().to_lowercase();
        Ok(state
            .rows
            .values()
            .filter(|row| row.repo == wanted)
            .cloned()
            .collect())
    }

    fn row_by_session_id(&self, session_id: &str) -> Result<Option<IssueRow>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("issue store mutex poisoned"))?;
        Ok(state
            .rows
            .values()
            .find(|row| {
                row.scoping_session_id.as_deref() == Some(session_id)
                    || row.fixing_session_id.as_deref() == Some(session_id)
            })
            .cloned())
    }
}
