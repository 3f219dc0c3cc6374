//! `scout` binary: wires the HTTP clients, durable store, comment bridge,
//! and poll scheduler into one triage loop for a single repository.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use scout_agent::{AgentSessionApi, HttpAgentClient};
use scout_core::SessionInfo;
use scout_github::{HttpGithubClient, IssueTrackerApi, RepoRef};
use scout_runtime::{
    CommentBridge, IssueTable, NoticeHub, PollScheduler, PollSchedulerConfig, SessionBindingCache,
    UserNotice,
};
use scout_store::{IssueRowStore, JsonFileIssueStore};

const SESSION_BINDING_TTL: Duration = Duration::from_secs(60 * 60);
const SESSION_BINDING_CAP: usize = 256;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "scout",
    about = "Issue-triage bridge between a repository tracker and an autonomous coding agent",
    version
)]
struct Cli {
    /// Repository to triage, as owner/repo.
    #[arg(long, env = "SCOUT_REPO")]
    repo: String,

    /// Agent service API base URL.
    #[arg(long, env = "SCOUT_AGENT_API_BASE", default_value = "https://api.devin.ai/v1")]
    agent_api_base: String,

    /// Agent service API token.
    #[arg(long, env = "SCOUT_AGENT_TOKEN")]
    agent_token: String,

    /// Issue tracker API base URL.
    #[arg(long, env = "SCOUT_GITHUB_API_BASE", default_value = "https://api.github.com")]
    github_api_base: String,

    /// Issue tracker API token.
    #[arg(long, env = "SCOUT_GITHUB_TOKEN")]
    github_token: String,

    /// Durable issue-store path; omit to run without persistence.
    #[arg(long, env = "SCOUT_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Per-request HTTP timeout in milliseconds.
    #[arg(long, env = "SCOUT_REQUEST_TIMEOUT_MS", default_value_t = 30_000, value_parser = parse_positive_u64)]
    request_timeout_ms: u64,

    /// Wall-clock budget for one agent session in milliseconds.
    #[arg(long, env = "SCOUT_SESSION_TIMEOUT_MS", default_value_t = 30 * 60 * 1_000, value_parser = parse_positive_u64)]
    session_timeout_ms: u64,

    /// Seconds between inbound comment sweeps.
    #[arg(long, env = "SCOUT_SWEEP_INTERVAL_SECS", default_value_t = 30, value_parser = parse_positive_u64)]
    sweep_interval_secs: u64,

    /// Attach to an existing agent session id at startup.
    #[arg(long)]
    watch_session: Option<String>,

    /// Run a single sweep pass and exit instead of looping.
    #[arg(long)]
    poll_once: bool,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn render_notice(notice: &UserNotice) {
    match notice {
        UserNotice::AuthBanner { origin, message } => {
            tracing::error!(origin = origin.as_str(), %message, "authentication failed");
        }
        UserNotice::Toast { message } => {
            tracing::warn!(%message, "notice");
        }
        UserNotice::SessionExpired {
            session_id,
            message,
        } => {
            tracing::warn!(%session_id, %message, "agent session expired");
        }
    }
}

/// Rehydrates the in-memory issue table from persisted rows so a restart
/// resumes with the statuses and comment watermarks of the previous run.
fn rehydrate_issues(
    store: &Arc<dyn IssueRowStore>,
    issues: &scout_runtime::SharedIssueTable,
    repo_slug: &str,
) -> Result<usize> {
    let rows = store.rows_by_repo(repo_slug)?;
    let mut table = issues
        .lock()
        .map_err(|_| anyhow::anyhow!("issue table lock poisoned"))?;
    let count = rows.len();
    for row in rows {
        let issue = table.ensure(row.issue_number);
        if let Some(status) = row.status {
            issue.status = status;
        }
        issue.confidence = row.confidence;
        issue.last_agent_comment_id = row.last_agent_comment_id;
        issue.last_agent_comment_at_unix_ms = row.last_agent_comment_at_unix_ms;
        issue.github_comment_url = row.github_comment_url.clone();
        if let Some(session_id) = row.scoping_session_id {
            issue.scoping_session = Some(SessionInfo {
                session_id,
                url: None,
                // The original start stamp keeps the wall-clock budget
                // running across restarts.
                started_at_unix_ms: row
                    .scoping_session_started_at_unix_ms
                    .unwrap_or(row.updated_at_unix_ms),
            });
        }
        if let Some(session_id) = row.fixing_session_id {
            issue.fixing_session = Some(SessionInfo {
                session_id,
                url: None,
                started_at_unix_ms: row
                    .fixing_session_started_at_unix_ms
                    .unwrap_or(row.updated_at_unix_ms),
            });
        }
    }
    Ok(count)
}

async fn run(cli: Cli) -> Result<()> {
    let repo = RepoRef::parse(&cli.repo)?;
    let repo_slug = repo.as_slug();

    let agent: Arc<dyn AgentSessionApi> = Arc::new(HttpAgentClient::new(
        &cli.agent_api_base,
        &cli.agent_token,
        cli.request_timeout_ms,
    )?);
    let tracker: Arc<dyn IssueTrackerApi> = Arc::new(HttpGithubClient::new(
        &cli.github_api_base,
        &cli.github_token,
        repo,
        cli.request_timeout_ms,
    )?);
    let store: Option<Arc<dyn IssueRowStore>> = match &cli.store_path {
        Some(path) => {
            let loaded = JsonFileIssueStore::load(path.clone())
                .with_context(|| format!("failed to load issue store {}", path.display()))?;
            Some(Arc::new(loaded))
        }
        None => None,
    };

    let issues = IssueTable::shared();
    if let Some(store) = &store {
        let restored = rehydrate_issues(store, &issues, &repo_slug)?;
        if restored > 0 {
            tracing::info!(restored, "restored issue rows from the durable store");
        }
    }

    let (notices, mut notice_rx) = NoticeHub::new();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            render_notice(&notice);
        }
    });

    let bridge = Arc::new(CommentBridge::new(
        Arc::clone(&tracker),
        Arc::clone(&agent),
        Arc::clone(&issues),
        store.clone(),
        repo_slug.clone(),
        notices.clone(),
    ));

    let mut config = PollSchedulerConfig::new(repo_slug.clone());
    config.sweep_interval = Duration::from_secs(cli.sweep_interval_secs);
    config.session_timeout_ms = cli.session_timeout_ms;
    let scheduler = PollScheduler::new(
        config,
        agent,
        bridge,
        issues,
        store,
        Arc::new(SessionBindingCache::new(
            SESSION_BINDING_TTL,
            SESSION_BINDING_CAP,
        )),
        notices,
    );

    if cli.poll_once {
        if let Some(session_id) = &cli.watch_session {
            if !scheduler.poll_session_once(session_id).await {
                tracing::warn!(%session_id, "session id not found in cache or store, skipping");
            }
        }
        let forwarded = scheduler.sweep_once().await;
        tracing::info!(forwarded, repo = %repo_slug, "single reconciliation pass complete");
        return Ok(());
    }

    if let Some(session_id) = &cli.watch_session {
        if scheduler.watch_session_by_id(session_id) {
            tracing::info!(%session_id, "watching existing agent session");
        } else {
            tracing::warn!(%session_id, "session id not found in cache or store, ignoring");
        }
    }

    tracing::info!(repo = %repo_slug, "scout triage loop started");
    scheduler.run_until_shutdown().await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::{rehydrate_issues, Cli};
    use clap::Parser;
    use scout_runtime::IssueTable;
    use scout_store::{IssueRowPatch, IssueRowStore, JsonFileIssueStore};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn regression_rehydrate_restores_persisted_session_start_stamp() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileIssueStore::load(dir.path().join("issues.json")).expect("load");
        store
            .upsert_issue_row(
                "octo/widgets",
                12,
                &IssueRowPatch {
                    status: Some(scout_core::IssueStatus::Fixing),
                    fixing_session_id: Some("devin-fix-12".to_string()),
                    fixing_session_started_at_unix_ms: Some(1_700_000_000_000),
                    ..IssueRowPatch::default()
                },
            )
            .expect("upsert");

        let store: Arc<dyn IssueRowStore> = Arc::new(store);
        let issues = IssueTable::shared();
        let restored = rehydrate_issues(&store, &issues, "octo/widgets").expect("rehydrate");
        assert_eq!(restored, 1);

        let table = issues.lock().expect("issues lock");
        let session = table
            .get(12)
            .expect("issue restored")
            .fixing_session
            .as_ref()
            .expect("fixing session restored");
        assert_eq!(session.session_id, "devin-fix-12");
        // The original start stamp comes back, not the row's write stamp.
        assert_eq!(session.started_at_unix_ms, 1_700_000_000_000);
    }

    #[test]
    fn unit_cli_parses_minimal_arguments() {
        let cli = Cli::try_parse_from([
            "scout",
            "--repo",
            "acme/widgets",
            "--agent-token",
            "agent-secret",
            "--github-token",
            "gh-secret",
        ])
        .expect("minimal args");
        assert_eq!(cli.repo, "acme/widgets");
        assert!(!cli.poll_once);
        assert!(cli.store_path.is_none());
        assert_eq!(cli.sweep_interval_secs, 30);
    }

    #[test]
    fn unit_cli_rejects_zero_timeout() {
        let result = Cli::try_parse_from([
            "scout",
            "--repo",
            "acme/widgets",
            "--agent-token",
            "agent-secret",
            "--github-token",
            "gh-secret",
            "--request-timeout-ms",
            "0",
        ]);
        assert!(result.is_err());
    }
}
