//! Bidirectional comment bridge: forwards agent questions out to the issue
//! thread and net-new human replies back into the session, suppressing
//! self-authored comments, duplicate echoes, and concurrent sweeps of the
//! same issue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use scout_agent::{AgentApiError, AgentSessionApi};
use scout_core::{
    blocked_comment, done_comment, green_scoped_comment, is_duplicate, is_self_authored,
    ready_after_clarification_comment, scoping_question_comment, Confidence, DashboardIssue,
    IssuePatch, IssueStatus, PollResult, DUPLICATE_WINDOW_MS,
};
use scout_github::{GithubApiError, IssueComment, IssueTrackerApi, PostedComment};
use scout_store::{IssueRowPatch, IssueRowStore};

use crate::clock::now_unix_ms;
use crate::inflight::InflightTable;
use crate::issue_table::SharedIssueTable;
use crate::notices::{NoticeHub, ServiceOrigin};

/// Pending outbound human messages are pruned once they age past this
/// multiple of the duplicate window.
const PENDING_OUTBOUND_HORIZON_FACTOR: u64 = 2;

struct PendingOutbound {
    text: String,
    at_unix_ms: u64,
}

pub struct CommentBridge {
    tracker: Arc<dyn IssueTrackerApi>,
    agent: Arc<dyn AgentSessionApi>,
    issues: SharedIssueTable,
    store: Option<Arc<dyn IssueRowStore>>,
    repo_slug: String,
    notices: NoticeHub,
    inflight: InflightTable,
    toasted: Mutex<HashSet<&'static str>>,
    pending_outbound: Mutex<Vec<PendingOutbound>>,
    duplicate_window_ms: u64,
}

fn forward_message(comment_body: &str) -> String {
    format!(
        "A human replied on the issue thread:\n\n{comment_body}\n\nPlease re-analyze the issue \
         taking this reply into account and emit an updated structured output block."
    )
}

fn bookkeeping_patch(posted: &PostedComment) -> IssuePatch {
    IssuePatch {
        last_agent_comment_id: Some(posted.id),
        last_agent_comment_at_unix_ms: Some(posted.created_at_unix_ms),
        github_comment_url: Some(posted.html_url.clone()),
        ..IssuePatch::default()
    }
}

impl CommentBridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Arc<dyn IssueTrackerApi>,
        agent: Arc<dyn AgentSessionApi>,
        issues: SharedIssueTable,
        store: Option<Arc<dyn IssueRowStore>>,
        repo_slug: String,
        notices: NoticeHub,
    ) -> Self {
        Self {
            tracker,
            agent,
            issues,
            store,
            repo_slug,
            notices,
            inflight: InflightTable::new(),
            toasted: Mutex::new(HashSet::new()),
            pending_outbound: Mutex::new(Vec::new()),
            duplicate_window_ms: DUPLICATE_WINDOW_MS,
        }
    }

    /// Posts a comment to the issue thread. Returns `None` on any failure; a
    /// 403 additionally raises a one-time toast and is never retried.
    pub async fn post(&self, issue_number: u64, body: &str) -> Option<PostedComment> {
        match self.tracker.create_comment(issue_number, body).await {
            Ok(posted) => Some(posted),
            Err(error) if error.is_permission_denied() => {
                self.toast_once(
                    "comment-write-permission",
                    "Scout can't comment on this repository: the tracker token lacks write \
                     permission.",
                );
                None
            }
            Err(error) => {
                self.report_tracker_error("create comment", &error);
                None
            }
        }
    }

    /// Records a human message the dashboard just relayed outward, so its
    /// echo observed through the next inbound poll is not re-forwarded.
    pub fn note_outbound_human_message(&self, text: &str, at_unix_ms: u64) {
        let Ok(mut pending) = self.pending_outbound.lock() else {
            return;
        };
        let horizon = self
            .duplicate_window_ms
            .saturating_mul(PENDING_OUTBOUND_HORIZON_FACTOR);
        let now = now_unix_ms();
        pending.retain(|entry| now.saturating_sub(entry.at_unix_ms) <= horizon);
        pending.push(PendingOutbound {
            text: text.to_string(),
            at_unix_ms,
        });
    }

    fn is_pending_outbound_echo(&self, comment: &IssueComment) -> bool {
        let Ok(pending) = self.pending_outbound.lock() else {
            return false;
        };
        pending.iter().any(|entry| {
            is_duplicate(
                &comment.body,
                &entry.text,
                comment.created_at_unix_ms,
                entry.at_unix_ms,
                self.duplicate_window_ms,
            )
        })
    }

    /// Polls the issue thread for replies newer than the watermark and
    /// forwards net-new human comments into the named session. Returns true
    /// iff at least one comment was newly forwarded; a call arriving while
    /// another poll for the same issue is in flight returns false
    /// immediately.
    pub async fn poll_inbound(&self, issue_number: u64, session_id: &str) -> bool {
        let Some(_permit) = self.inflight.acquire(issue_number) else {
            return false;
        };
        let Some(issue) = self
            .issues
            .lock()
            .ok()
            .and_then(|table| table.snapshot(issue_number))
        else {
            return false;
        };

        let comments = match self
            .tracker
            .list_comments(issue_number, issue.last_agent_comment_at_unix_ms)
            .await
        {
            Ok(comments) => comments,
            Err(error) => {
                self.report_tracker_error("list inbound comments", &error);
                return false;
            }
        };

        let mut marked = Vec::new();
        let mut forwarded_any = false;
        for comment in comments {
            if issue.forwarded_comment_ids.contains(&comment.id) {
                continue;
            }
            if is_self_authored(&comment.body) {
                continue;
            }
            if self.is_pending_outbound_echo(&comment) {
                // The sender's own text coming back through the poll; mark
                // it forwarded so later sweeps skip it, but do not forward.
                marked.push(comment.id);
                continue;
            }
            if let Err(error) = self
                .agent
                .send_message(session_id, &forward_message(&comment.body))
                .await
            {
                self.report_agent_error("forward issue reply", &error);
                // Left unmarked so the next sweep retries: at-least-once.
                break;
            }
            if let Err(error) = self.tracker.create_reaction(comment.id).await {
                tracing::debug!(comment_id = comment.id, %error, "reaction post failed");
            }
            marked.push(comment.id);
            forwarded_any = true;
        }

        if !marked.is_empty() {
            let patch = if forwarded_any {
                IssuePatch::rescoping_reset(marked)
            } else {
                IssuePatch {
                    forward_comment_ids: marked,
                    ..IssuePatch::default()
                }
            };
            let post = self
                .issues
                .lock()
                .ok()
                .map(|mut table| table.apply(issue_number, &patch).1);
            if let Some(post) = post {
                self.sync_to_store(&post);
            }
        }
        forwarded_any
    }

    /// Emits the outbound comment a freshly applied poll result calls for,
    /// if any, and returns the follow-up bookkeeping patch to apply.
    pub async fn announce(
        &self,
        pre: &DashboardIssue,
        post: &DashboardIssue,
        result: &PollResult,
    ) -> Option<IssuePatch> {
        match result {
            PollResult::Scoped { .. } => self.announce_scoped(pre, post).await,
            PollResult::Done { .. } => {
                let Some(pr) = post.pr.as_ref() else {
                    tracing::info!(
                        issue_number = post.issue_number,
                        "fix session completed without a pull request"
                    );
                    return None;
                };
                let posted = self
                    .post(post.issue_number, &done_comment(Some(pr)))
                    .await?;
                Some(bookkeeping_patch(&posted))
            }
            PollResult::Blocked { .. } => {
                // Re-observing the same blocker does not re-post.
                if pre.status == IssueStatus::Blocked {
                    return None;
                }
                let what_happened = post
                    .blocker
                    .as_ref()
                    .map(|blocker| blocker.what_happened.as_str())
                    .unwrap_or("The session is blocked.");
                let posted = self
                    .post(post.issue_number, &blocked_comment(what_happened))
                    .await?;
                Some(bookkeeping_patch(&posted))
            }
            PollResult::Failed { .. }
            | PollResult::TimedOut { .. }
            | PollResult::Continue { .. } => None,
        }
    }

    async fn announce_scoped(
        &self,
        pre: &DashboardIssue,
        post: &DashboardIssue,
    ) -> Option<IssuePatch> {
        let scoping = post.scoping.as_ref()?;
        let confidence = post.confidence.unwrap_or(Confidence::Yellow);
        match confidence {
            Confidence::Yellow | Confidence::Red if !scoping.open_questions.is_empty() => {
                let posted = self
                    .post(post.issue_number, &scoping_question_comment(scoping))
                    .await?;
                let mut patch = IssuePatch::awaiting_reply(Some(posted.html_url.clone()));
                patch.last_agent_comment_id = Some(posted.id);
                patch.last_agent_comment_at_unix_ms = Some(posted.created_at_unix_ms);
                Some(patch)
            }
            Confidence::Green => {
                let body = if pre.forwarded_comment_ids.is_empty() {
                    green_scoped_comment(scoping)
                } else {
                    ready_after_clarification_comment(scoping)
                };
                let posted = self.post(post.issue_number, &body).await?;
                Some(bookkeeping_patch(&posted))
            }
            _ => None,
        }
    }

    /// Fire-and-forget durable sync; failures are swallowed and must never
    /// interrupt the transition they accompany.
    pub fn sync_to_store(&self, issue: &DashboardIssue) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let repo = self.repo_slug.clone();
        let row_patch = IssueRowPatch {
            status: Some(issue.status),
            confidence: issue.confidence,
            scoping_session_id: issue
                .scoping_session
                .as_ref()
                .map(|session| session.session_id.clone()),
            scoping_session_started_at_unix_ms: issue
                .scoping_session
                .as_ref()
                .map(|session| session.started_at_unix_ms),
            fixing_session_id: issue
                .fixing_session
                .as_ref()
                .map(|session| session.session_id.clone()),
            fixing_session_started_at_unix_ms: issue
                .fixing_session
                .as_ref()
                .map(|session| session.started_at_unix_ms),
            last_agent_comment_id: issue.last_agent_comment_id,
            last_agent_comment_at_unix_ms: issue.last_agent_comment_at_unix_ms,
            github_comment_url: issue.github_comment_url.clone(),
        };
        let issue_number = issue.issue_number;
        tokio::task::spawn_blocking(move || {
            if let Err(error) = store.upsert_issue_row(&repo, issue_number, &row_patch) {
                tracing::debug!(issue_number, %error, "issue row sync failed");
            }
        });
    }

    fn toast_once(&self, key: &'static str, message: &str) {
        let fresh = self
            .toasted
            .lock()
            .map(|mut seen| seen.insert(key))
            .unwrap_or(false);
        if fresh {
            self.notices.toast(message);
        }
    }

    fn report_tracker_error(&self, operation: &str, error: &GithubApiError) {
        if error.is_auth() {
            self.notices
                .auth_banner(ServiceOrigin::IssueTracker, error.to_string());
        } else {
            tracing::warn!(operation, %error, "issue tracker call failed");
        }
    }

    fn report_agent_error(&self, operation: &str, error: &AgentApiError) {
        if error.is_auth() {
            self.notices
                .auth_banner(ServiceOrigin::AgentService, error.to_string());
        } else {
            tracing::warn!(operation, %error, "agent service call failed");
        }
    }
}
