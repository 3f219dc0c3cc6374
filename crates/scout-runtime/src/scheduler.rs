//! Poll scheduler: one adaptively paced loop over the single watched agent
//! session, and a fixed-interval sweep over every issue awaiting replies.
//!
//! Exactly one timer handle is live for the active loop at any moment;
//! scheduling the next poll cancels the pending one, and clearing the
//! active session cancels the loop outright. Within a poll resolution the
//! local patch is applied before any outbound comment post is attempted;
//! durable-store sync is fire-and-forget.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use scout_agent::AgentSessionApi;
use scout_core::{
    decide, interpret, DashboardIssue, IssuePatch, IssueStatus, PollCategory, PollContext,
    PollResult, RetryDecision, SessionInfo, SessionKind,
};
use scout_store::IssueRowStore;

use crate::bridge::CommentBridge;
use crate::clock::now_unix_ms;
use crate::issue_table::SharedIssueTable;
use crate::notices::{NoticeHub, ServiceOrigin};
use crate::schedule::{schedule_after, ScheduledTask};
use crate::session_cache::{SessionBinding, SessionBindingCache};

#[derive(Debug, Clone, Copy)]
/// Poll pacing per outcome category. Not a literal exponential backoff:
/// each interval is tuned to the expected responsiveness of its state.
pub struct PollIntervals {
    pub scoping: Duration,
    pub fixing: Duration,
    pub blocked: Duration,
    pub fallback: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            scoping: Duration::from_secs(20),
            fixing: Duration::from_secs(10),
            blocked: Duration::from_secs(30),
            fallback: Duration::from_secs(15),
        }
    }
}

impl PollIntervals {
    pub fn for_category(&self, category: PollCategory) -> Duration {
        match category {
            PollCategory::Scoping => self.scoping,
            PollCategory::Fixing => self.fixing,
            PollCategory::Blocked => self.blocked,
            PollCategory::Default => self.fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSchedulerConfig {
    pub repo_slug: String,
    pub intervals: PollIntervals,
    pub sweep_interval: Duration,
    pub session_timeout_ms: u64,
}

impl PollSchedulerConfig {
    pub fn new(repo_slug: impl Into<String>) -> Self {
        Self {
            repo_slug: repo_slug.into(),
            intervals: PollIntervals::default(),
            sweep_interval: Duration::from_secs(30),
            session_timeout_ms: 30 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone)]
struct WatchedSession {
    session_id: String,
    kind: SessionKind,
    issue_number: u64,
}

#[derive(Default)]
struct ActiveState {
    watched: Option<WatchedSession>,
    timer: Option<ScheduledTask>,
    failure_streak: u32,
}

struct SchedulerInner {
    config: PollSchedulerConfig,
    agent: Arc<dyn AgentSessionApi>,
    bridge: Arc<CommentBridge>,
    issues: SharedIssueTable,
    store: Option<Arc<dyn IssueRowStore>>,
    bindings: Arc<SessionBindingCache>,
    notices: NoticeHub,
    active: Mutex<ActiveState>,
}

#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollScheduler {
    pub fn new(
        config: PollSchedulerConfig,
        agent: Arc<dyn AgentSessionApi>,
        bridge: Arc<CommentBridge>,
        issues: SharedIssueTable,
        store: Option<Arc<dyn IssueRowStore>>,
        bindings: Arc<SessionBindingCache>,
        notices: NoticeHub,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                agent,
                bridge,
                issues,
                store,
                bindings,
                notices,
                active: Mutex::new(ActiveState::default()),
            }),
        }
    }

    /// Records a freshly created session against its issue: binding cache,
    /// issue session info, and durable row.
    pub fn bind_session(
        &self,
        issue_number: u64,
        kind: SessionKind,
        session_id: &str,
        url: Option<String>,
    ) {
        self.inner.bindings.insert(
            session_id,
            SessionBinding { issue_number, kind },
        );
        let info = SessionInfo {
            session_id: session_id.to_string(),
            url,
            started_at_unix_ms: now_unix_ms(),
        };
        let patch = match kind {
            SessionKind::Scoping => IssuePatch {
                status: Some(IssueStatus::Scoping),
                scoping_session: Some(info),
                ..IssuePatch::default()
            },
            SessionKind::Fixing => IssuePatch {
                status: Some(IssueStatus::Fixing),
                fixing_session: Some(info),
                ..IssuePatch::default()
            },
        };
        self.apply_and_sync(issue_number, &patch);
    }

    /// Makes the named session the dashboard-wide watched session and
    /// schedules an immediate poll. Clear-then-set: any pending timer is
    /// cancelled first.
    pub fn watch_session(&self, issue_number: u64, session_id: &str, kind: SessionKind) {
        self.set_watched(issue_number, session_id, kind);
        self.schedule_next(Duration::ZERO);
    }

    pub(crate) fn set_watched(&self, issue_number: u64, session_id: &str, kind: SessionKind) {
        if let Ok(mut active) = self.inner.active.lock() {
            if let Some(timer) = active.timer.take() {
                timer.cancel();
            }
            active.watched = Some(WatchedSession {
                session_id: session_id.to_string(),
                kind,
                issue_number,
            });
            active.failure_streak = 0;
        }
    }

    /// Resolves a bare session id to its issue and kind through the binding
    /// cache, falling back to the durable store.
    pub fn resolve_session(&self, session_id: &str) -> Option<(u64, SessionKind)> {
        if let Some(binding) = self.inner.bindings.get(session_id) {
            return Some((binding.issue_number, binding.kind));
        }
        let store = self.inner.store.as_ref()?;
        let row = store.row_by_session_id(session_id).ok()??;
        let kind = if row.fixing_session_id.as_deref() == Some(session_id) {
            SessionKind::Fixing
        } else {
            SessionKind::Scoping
        };
        Some((row.issue_number, kind))
    }

    /// Re-arms watching from a bare session id.
    pub fn watch_session_by_id(&self, session_id: &str) -> bool {
        match self.resolve_session(session_id) {
            Some((issue_number, kind)) => {
                self.watch_session(issue_number, session_id, kind);
                true
            }
            None => false,
        }
    }

    /// One-shot poll of a session without arming the timer loop. Returns
    /// false when the session id cannot be resolved to an issue.
    pub async fn poll_session_once(&self, session_id: &str) -> bool {
        let Some((issue_number, kind)) = self.resolve_session(session_id) else {
            return false;
        };
        self.set_watched(issue_number, session_id, kind);
        self.poll_active_once().await;
        self.clear_active();
        true
    }

    /// Cancels the active-session loop outright.
    pub fn clear_active(&self) {
        if let Ok(mut active) = self.inner.active.lock() {
            if let Some(timer) = active.timer.take() {
                timer.cancel();
            }
            active.watched = None;
            active.failure_streak = 0;
        }
    }

    #[cfg(test)]
    pub(crate) fn bridge_for_tests(&self) -> Arc<CommentBridge> {
        Arc::clone(&self.inner.bridge)
    }

    pub fn watched_session_id(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .ok()?
            .watched
            .as_ref()
            .map(|watched| watched.session_id.clone())
    }

    fn schedule_next(&self, delay: Duration) {
        let scheduler = self.clone();
        let task = schedule_after(delay, async move {
            scheduler.poll_cycle().await;
        });
        if let Ok(mut active) = self.inner.active.lock() {
            if let Some(previous) = active.timer.take() {
                previous.cancel();
            }
            active.timer = Some(task);
        }
    }

    async fn poll_cycle(&self) {
        if let Some(delay) = self.poll_active_once().await {
            self.schedule_next(delay);
        }
    }

    /// Runs one poll of the watched session. Returns the delay until the
    /// next poll, or `None` when the loop should stop.
    pub async fn poll_active_once(&self) -> Option<Duration> {
        let watched = self
            .inner
            .active
            .lock()
            .ok()
            .and_then(|active| active.watched.clone())?;

        let snapshot = match self.inner.agent.get_session(&watched.session_id).await {
            Ok(snapshot) => snapshot,
            Err(error) if error.is_auth() => {
                self.inner
                    .notices
                    .auth_banner(ServiceOrigin::AgentService, error.to_string());
                self.clear_active();
                return None;
            }
            Err(error) if error.is_not_found() => {
                self.inner.notices.session_expired(
                    &watched.session_id,
                    format!("session {} no longer exists", watched.session_id),
                );
                self.clear_active();
                return None;
            }
            Err(error) => {
                let streak = self
                    .inner
                    .active
                    .lock()
                    .map(|mut active| {
                        active.failure_streak = active.failure_streak.saturating_add(1);
                        active.failure_streak
                    })
                    .unwrap_or(1);
                tracing::warn!(
                    session_id = %watched.session_id,
                    failure_streak = streak,
                    %error,
                    "session poll failed, rescheduling at fallback interval"
                );
                return Some(self.inner.config.intervals.fallback);
            }
        };
        if let Ok(mut active) = self.inner.active.lock() {
            active.failure_streak = 0;
        }

        let started_at = self
            .inner
            .issues
            .lock()
            .ok()
            .and_then(|table| table.snapshot(watched.issue_number))
            .and_then(|issue| {
                issue
                    .session_for(watched.kind)
                    .map(|session| session.started_at_unix_ms)
            });
        let ctx = PollContext {
            issue_number: watched.issue_number,
            session_started_at_unix_ms: started_at,
            timeout_limit_ms: self.inner.config.session_timeout_ms,
            now_unix_ms: now_unix_ms(),
        };
        let result = interpret(&snapshot, watched.kind, &ctx);

        if let Some(patch) = result.patch() {
            // Local state commits before any outbound comment goes out.
            let states = self
                .inner
                .issues
                .lock()
                .ok()
                .map(|mut table| table.apply(watched.issue_number, patch));
            if let Some((pre, post)) = states {
                self.inner.bridge.sync_to_store(&post);
                if let Some(follow_up) = self.inner.bridge.announce(&pre, &post, &result).await {
                    self.apply_and_sync(watched.issue_number, &follow_up);
                }
            }
        }

        match &result {
            PollResult::Continue { next_poll } => {
                Some(self.inner.config.intervals.for_category(*next_poll))
            }
            PollResult::Blocked { .. } => Some(self.inner.config.intervals.blocked),
            PollResult::Scoped { .. }
            | PollResult::Done { .. }
            | PollResult::Failed { .. }
            | PollResult::TimedOut { .. } => {
                tracing::info!(
                    issue_number = watched.issue_number,
                    session_id = %watched.session_id,
                    "session reached a terminal outcome, stopping poll loop"
                );
                self.clear_active();
                None
            }
        }
    }

    /// One pass of the inbound sweep: every issue awaiting replies with a
    /// watermark and a resolvable session id, short-circuiting after the
    /// first issue that actually forwards, so a slow tracker API is not
    /// hammered across many issues per tick.
    pub async fn sweep_once(&self) -> bool {
        let candidates: Vec<(u64, String)> = match self.inner.issues.lock() {
            Ok(table) => table
                .all()
                .filter(|issue| {
                    matches!(
                        issue.status,
                        IssueStatus::AwaitingReply | IssueStatus::Scoped
                    ) && issue.last_agent_comment_at_unix_ms.is_some()
                })
                .filter_map(|issue| {
                    issue
                        .scoping_session
                        .as_ref()
                        .map(|session| (issue.issue_number, session.session_id.clone()))
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut polled = 0usize;
        for (issue_number, session_id) in candidates {
            polled += 1;
            if self.inner.bridge.poll_inbound(issue_number, &session_id).await {
                tracing::info!(
                    polled,
                    issue_number,
                    "forwarded human reply, re-entering scoping"
                );
                self.watch_session(issue_number, &session_id, SessionKind::Scoping);
                return true;
            }
        }
        if polled > 0 {
            tracing::info!(polled, forwarded = 0, "inbound sweep cycle complete");
        }
        false
    }

    /// Out-of-band retry requested by the user on a stalled issue: wake the
    /// blocked session in place when it is still addressable, otherwise
    /// recreate a fresh one carrying paraphrased context.
    pub async fn retry_issue(
        &self,
        issue_number: u64,
        pending_user_text: Option<&str>,
    ) -> Result<()> {
        let issue = self
            .inner
            .issues
            .lock()
            .ok()
            .and_then(|table| table.snapshot(issue_number))
            .ok_or_else(|| anyhow!("unknown issue {issue_number}"))?;

        match decide(&issue, pending_user_text) {
            RetryDecision::Wake {
                session_id,
                message,
            } => {
                self.inner
                    .agent
                    .send_message(&session_id, &message)
                    .await
                    .with_context(|| format!("failed to wake session {session_id}"))?;
                self.apply_and_sync(issue_number, &IssuePatch::status_only(IssueStatus::Fixing));
                self.watch_session(issue_number, &session_id, SessionKind::Fixing);
            }
            RetryDecision::Recreate {
                previous_context,
                session_id,
            } => {
                if let Some(old_session) = session_id {
                    // Advisory cleanup of the dead session.
                    if let Err(error) = self.inner.agent.delete_session(&old_session).await {
                        tracing::debug!(%error, session_id = %old_session, "old session cleanup failed");
                    }
                }
                let prompt = recreate_prompt(
                    &self.inner.config.repo_slug,
                    issue_number,
                    previous_context.as_deref(),
                );
                let handle = self
                    .inner
                    .agent
                    .create_session(&prompt, SessionKind::Fixing, None)
                    .await
                    .context("failed to create replacement fix session")?;
                self.bind_session(issue_number, SessionKind::Fixing, &handle.id, handle.url);
                self.watch_session(issue_number, &handle.id, SessionKind::Fixing);
            }
        }
        Ok(())
    }

    /// Runs the fixed-interval inbound sweep until ctrl-c.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.inner.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    self.clear_active();
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    fn apply_and_sync(&self, issue_number: u64, patch: &IssuePatch) -> Option<DashboardIssue> {
        let post = self
            .inner
            .issues
            .lock()
            .ok()
            .map(|mut table| table.apply(issue_number, patch).1)?;
        self.inner.bridge.sync_to_store(&post);
        Some(post)
    }
}

fn recreate_prompt(repo_slug: &str, issue_number: u64, previous_context: Option<&str>) -> String {
    match previous_context {
        Some(context) => format!(
            "Continue fixing issue #{issue_number} in {repo_slug}. Context from the previous \
             attempt:\n{context}"
        ),
        None => format!("Fix issue #{issue_number} in {repo_slug}."),
    }
}
