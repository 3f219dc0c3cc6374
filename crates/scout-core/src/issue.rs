//! Local issue aggregate and the pure patch-transition function.
//!
//! `DashboardIssue` is mutated exclusively through named `IssuePatch` values
//! applied by `apply_patch`; the same transition runs identically under a
//! service loop, a test harness, or a UI adapter. Issues are never deleted,
//! only status-transitioned.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::scoping::{Confidence, ScopingResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `IssueStatus` lifecycle values.
pub enum IssueStatus {
    Pending,
    Scoping,
    Scoped,
    Fixing,
    Blocked,
    AwaitingReply,
    TimedOut,
    Failed,
    Aborted,
    Done,
    PrOpen,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scoping => "scoping",
            Self::Scoped => "scoped",
            Self::Fixing => "fixing",
            Self::Blocked => "blocked",
            Self::AwaitingReply => "awaiting_reply",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Done => "done",
            Self::PrOpen => "pr_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// What stalled a session and the fixed prompt asking the human for guidance.
pub struct BlockerInfo {
    pub what_happened: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Pull request parsed out of a session's reported URL.
pub struct PrInfo {
    pub url: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One agent session bound to this issue. The URL is only valid at creation
/// time; later reconciliation goes through the session id.
pub struct SessionInfo {
    pub session_id: String,
    pub url: Option<String>,
    pub started_at_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepItem {
    pub index: usize,
    pub label: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Local aggregate for one tracker issue, created `pending` on first fetch.
pub struct DashboardIssue {
    pub issue_number: u64,
    pub status: IssueStatus,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub scoping: Option<ScopingResult>,
    #[serde(default)]
    pub scoped_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub completed_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub blocker: Option<BlockerInfo>,
    #[serde(default)]
    pub pr: Option<PrInfo>,
    #[serde(default)]
    pub steps: Vec<StepItem>,
    #[serde(default)]
    pub scoping_session: Option<SessionInfo>,
    #[serde(default)]
    pub fixing_session: Option<SessionInfo>,
    #[serde(default)]
    pub last_agent_comment_id: Option<u64>,
    #[serde(default)]
    pub last_agent_comment_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub github_comment_url: Option<String>,
    #[serde(default)]
    pub forwarded_comment_ids: BTreeSet<u64>,
}

impl DashboardIssue {
    pub fn pending(issue_number: u64) -> Self {
        Self {
            issue_number,
            status: IssueStatus::Pending,
            confidence: None,
            scoping: None,
            scoped_at_unix_ms: None,
            completed_at_unix_ms: None,
            blocker: None,
            pr: None,
            steps: Vec::new(),
            scoping_session: None,
            fixing_session: None,
            last_agent_comment_id: None,
            last_agent_comment_at_unix_ms: None,
            github_comment_url: None,
            forwarded_comment_ids: BTreeSet::new(),
        }
    }

    pub fn session_for(&self, kind: crate::session::SessionKind) -> Option<&SessionInfo> {
        match kind {
            crate::session::SessionKind::Scoping => self.scoping_session.as_ref(),
            crate::session::SessionKind::Fixing => self.fixing_session.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Named field-level patch merged into a `DashboardIssue` by `apply_patch`.
pub struct IssuePatch {
    pub status: Option<IssueStatus>,
    pub confidence: Option<Confidence>,
    pub scoping: Option<ScopingResult>,
    pub scoped_at_unix_ms: Option<u64>,
    pub completed_at_unix_ms: Option<u64>,
    pub blocker: Option<BlockerInfo>,
    pub pr: Option<PrInfo>,
    pub steps: Option<Vec<StepItem>>,
    pub scoping_session: Option<SessionInfo>,
    pub fixing_session: Option<SessionInfo>,
    pub last_agent_comment_id: Option<u64>,
    pub last_agent_comment_at_unix_ms: Option<u64>,
    pub github_comment_url: Option<String>,
    /// Comment ids to merge into the forwarded set.
    pub forward_comment_ids: Vec<u64>,
    /// Clears confidence, scoping, scoped-at, and steps so the issue can
    /// re-enter the scoping cycle.
    pub clear_scoping: bool,
}

impl IssuePatch {
    pub fn status_only(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self::status_only(IssueStatus::TimedOut)
    }

    pub fn scoped(
        result: ScopingResult,
        steps: Vec<StepItem>,
        scoped_at_unix_ms: u64,
    ) -> Self {
        Self {
            status: Some(IssueStatus::Scoped),
            confidence: Some(result.confidence_or_default()),
            scoping: Some(result),
            scoped_at_unix_ms: Some(scoped_at_unix_ms),
            steps: Some(steps),
            ..Self::default()
        }
    }

    /// Scoping session closed without structured output: the dashboard shows
    /// an unscoped-but-closed session rather than failing.
    pub fn scoped_without_output() -> Self {
        Self::status_only(IssueStatus::Scoped)
    }

    pub fn done(pr: Option<PrInfo>, completed_at_unix_ms: u64) -> Self {
        Self {
            status: Some(if pr.is_some() {
                IssueStatus::PrOpen
            } else {
                IssueStatus::Done
            }),
            pr,
            completed_at_unix_ms: Some(completed_at_unix_ms),
            ..Self::default()
        }
    }

    pub fn failed(blocker: BlockerInfo) -> Self {
        Self {
            status: Some(IssueStatus::Failed),
            blocker: Some(blocker),
            ..Self::default()
        }
    }

    pub fn blocked(blocker: BlockerInfo) -> Self {
        Self {
            status: Some(IssueStatus::Blocked),
            blocker: Some(blocker),
            ..Self::default()
        }
    }

    pub fn awaiting_reply(comment_url: Option<String>) -> Self {
        Self {
            status: Some(IssueStatus::AwaitingReply),
            github_comment_url: comment_url,
            ..Self::default()
        }
    }

    /// Re-entry into the scoping cycle after forwarding human replies.
    pub fn rescoping_reset(forwarded_ids: Vec<u64>) -> Self {
        Self {
            status: Some(IssueStatus::Scoping),
            forward_comment_ids: forwarded_ids,
            clear_scoping: true,
            ..Self::default()
        }
    }
}

/// Pure transition: merges a patch into an issue and returns the result.
/// The input issue is never mutated.
pub fn apply_patch(issue: &DashboardIssue, patch: &IssuePatch) -> DashboardIssue {
    let mut next = issue.clone();
    if patch.clear_scoping {
        next.confidence = None;
        next.scoping = None;
        next.scoped_at_unix_ms = None;
        next.steps.clear();
    }
    if let Some(status) = patch.status {
        next.status = status;
    }
    if let Some(confidence) = patch.confidence {
        next.confidence = Some(confidence);
    }
    if let Some(scoping) = &patch.scoping {
        next.scoping = Some(scoping.clone());
    }
    if let Some(at) = patch.scoped_at_unix_ms {
        next.scoped_at_unix_ms = Some(at);
    }
    if let Some(at) = patch.completed_at_unix_ms {
        next.completed_at_unix_ms = Some(at);
    }
    if let Some(blocker) = &patch.blocker {
        next.blocker = Some(blocker.clone());
    }
    if let Some(pr) = &patch.pr {
        next.pr = Some(pr.clone());
    }
    if let Some(steps) = &patch.steps {
        next.steps = steps.clone();
    }
    if let Some(session) = &patch.scoping_session {
        next.scoping_session = Some(session.clone());
    }
    if let Some(session) = &patch.fixing_session {
        next.fixing_session = Some(session.clone());
    }
    if let Some(id) = patch.last_agent_comment_id {
        next.last_agent_comment_id = Some(id);
    }
    if let Some(at) = patch.last_agent_comment_at_unix_ms {
        next.last_agent_comment_at_unix_ms = Some(at);
    }
    if let Some(url) = &patch.github_comment_url {
        next.github_comment_url = Some(url.clone());
    }
    next.forwarded_comment_ids
        .extend(patch.forward_comment_ids.iter().copied());
    next
}

#[cfg(test)]
mod tests {
    use super::{apply_patch, BlockerInfo, DashboardIssue, IssuePatch, IssueStatus};
    use crate::scoping::{Confidence, ScopingResult};

    fn scoped_issue() -> DashboardIssue {
        let issue = DashboardIssue::pending(7);
        let result = ScopingResult {
            confidence: Some(Confidence::Yellow),
            open_questions: vec!["which env?".to_string()],
            ..ScopingResult::default()
        };
        apply_patch(&issue, &IssuePatch::scoped(result, Vec::new(), 1_000))
    }

    #[test]
    fn unit_apply_patch_merges_scoped_fields() {
        let issue = scoped_issue();
        assert_eq!(issue.status, IssueStatus::Scoped);
        assert_eq!(issue.confidence, Some(Confidence::Yellow));
        assert_eq!(issue.scoped_at_unix_ms, Some(1_000));
        assert!(issue.scoping.is_some());
    }

    #[test]
    fn unit_apply_patch_leaves_input_untouched() {
        let issue = DashboardIssue::pending(3);
        let _next = apply_patch(&issue, &IssuePatch::timed_out());
        assert_eq!(issue.status, IssueStatus::Pending);
    }

    #[test]
    fn functional_rescoping_reset_clears_scoping_and_merges_ids() {
        let issue = scoped_issue();
        let next = apply_patch(&issue, &IssuePatch::rescoping_reset(vec![41, 42]));
        assert_eq!(next.status, IssueStatus::Scoping);
        assert!(next.confidence.is_none());
        assert!(next.scoping.is_none());
        assert!(next.scoped_at_unix_ms.is_none());
        assert!(next.forwarded_comment_ids.contains(&41));
        assert!(next.forwarded_comment_ids.contains(&42));
    }

    #[test]
    fn unit_forwarded_ids_accumulate_across_patches() {
        let issue = DashboardIssue::pending(9);
        let first = apply_patch(&issue, &IssuePatch::rescoping_reset(vec![1]));
        let second = apply_patch(&first, &IssuePatch::rescoping_reset(vec![2]));
        assert_eq!(second.forwarded_comment_ids.len(), 2);
    }

    #[test]
    fn unit_done_patch_uses_pr_open_only_when_pr_parsed() {
        let with_pr = IssuePatch::done(
            Some(super::PrInfo {
                url: "https://github.com/o/r/pull/4".to_string(),
                owner: "o".to_string(),
                repo: "r".to_string(),
                number: 4,
            }),
            5_000,
        );
        assert_eq!(with_pr.status, Some(IssueStatus::PrOpen));
        let without_pr = IssuePatch::done(None, 5_000);
        assert_eq!(without_pr.status, Some(IssueStatus::Done));
    }

    #[test]
    fn unit_failed_patch_records_blocker() {
        let patch = IssuePatch::failed(BlockerInfo {
            what_happened: "stopped by operator".to_string(),
            suggestion: String::new(),
        });
        assert_eq!(patch.status, Some(IssueStatus::Failed));
        assert!(patch.blocker.is_some());
    }
}
