//! Status interpreter: maps one raw session poll onto one dashboard action.
//!
//! The decision rules are ordered and the order is load-bearing: a session
//! the agent service still reports as working is force-terminated locally
//! once it exceeds the caller's wall-clock budget, before its own status is
//! even considered.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::issue::{BlockerInfo, IssuePatch, PrInfo};
use crate::scoping::{parse_scoping_result, steps_from_plan};
use crate::session::{is_terminal, SessionKind, SessionSnapshot, SessionStatus};

/// Fixed prompt attached to every blocker asking the human for guidance.
pub const BLOCKER_SUGGESTION: &str =
    "Reply with guidance for the agent, or use retry to restart the session.";

/// Fixed narrative for a session that suspended itself. Distinguished from a
/// genuine blocker so the retry planner can choose wake-in-place.
pub const SLEEP_NARRATIVE: &str =
    "The agent session went to sleep before finishing. It can be woken in place with guidance.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Selects the next poll interval from the scheduler's category table.
pub enum PollCategory {
    Scoping,
    Fixing,
    Blocked,
    Default,
}

impl From<SessionKind> for PollCategory {
    fn from(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Scoping => Self::Scoping,
            SessionKind::Fixing => Self::Fixing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Closed union of dashboard actions produced by one poll. Only the carried
/// patch is ever persisted; the result itself is produced fresh every poll.
pub enum PollResult {
    Scoped { patch: IssuePatch },
    Done { patch: IssuePatch },
    Failed { patch: IssuePatch },
    Blocked { patch: IssuePatch },
    TimedOut { patch: IssuePatch },
    Continue { next_poll: PollCategory },
}

impl PollResult {
    pub fn patch(&self) -> Option<&IssuePatch> {
        match self {
            Self::Scoped { patch }
            | Self::Done { patch }
            | Self::Failed { patch }
            | Self::Blocked { patch }
            | Self::TimedOut { patch } => Some(patch),
            Self::Continue { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// Timing context for one poll. The clock is injected so interpretation is
/// deterministic under test.
pub struct PollContext {
    pub issue_number: u64,
    pub session_started_at_unix_ms: Option<u64>,
    pub timeout_limit_ms: u64,
    pub now_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

fn pr_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"github\.com/([^/\s]+)/([^/\s]+)/pull/(\d+)")
            .unwrap_or_else(|error| panic!("invalid pull request pattern: {error}"))
    })
}

/// Parses owner, repo, and number out of a pull request URL. A URL without
/// the literal `/pull/` segment yields `None`; callers treat that as a
/// PR-less completion rather than an error.
pub fn parse_pr_url(url: &str) -> Option<PrRef> {
    let captures = pr_url_pattern().captures(url)?;
    Some(PrRef {
        owner: captures.get(1)?.as_str().to_string(),
        repo: captures.get(2)?.as_str().to_string(),
        number: captures.get(3)?.as_str().parse().ok()?,
    })
}

fn strip_bracket_tags(text: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let pattern = TAG.get_or_init(|| {
        Regex::new(r"\[[^\]]*\]")
            .unwrap_or_else(|error| panic!("invalid bracket tag pattern: {error}"))
    });
    let stripped = pattern.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Interprets one session snapshot into a dashboard action. Deterministic
/// given identical inputs; never fails on malformed snapshots.
pub fn interpret(snapshot: &SessionSnapshot, kind: SessionKind, ctx: &PollContext) -> PollResult {
    // Rule 1: wall-clock budget, evaluated before the reported status.
    if let Some(started) = ctx.session_started_at_unix_ms {
        if ctx.now_unix_ms.saturating_sub(started) > ctx.timeout_limit_ms {
            return PollResult::TimedOut {
                patch: IssuePatch::timed_out(),
            };
        }
    }

    // Rule 2: agent-declared expiry, regardless of budget.
    if snapshot.status_enum == SessionStatus::Expired {
        return PollResult::TimedOut {
            patch: IssuePatch::timed_out(),
        };
    }

    // Rule 3: terminal states dispatch to the kind-specific handler.
    if is_terminal(snapshot.status_enum) {
        return match kind {
            SessionKind::Scoping => interpret_scoping_terminal(snapshot, ctx),
            SessionKind::Fixing => interpret_fixing_terminal(snapshot, ctx),
        };
    }

    // Rule 4: the agent may populate structured output before formally
    // finishing; treat an early result as terminal-scoped.
    if kind == SessionKind::Scoping && snapshot.structured_output.is_some() {
        return interpret_scoping_terminal(snapshot, ctx);
    }

    // Rule 5: blocked, with narrative from the latest agent message.
    if snapshot.status_enum == SessionStatus::Blocked {
        let narrative = snapshot
            .latest_agent_message()
            .unwrap_or(snapshot.status.as_str());
        return PollResult::Blocked {
            patch: IssuePatch::blocked(BlockerInfo {
                what_happened: strip_bracket_tags(narrative),
                suggestion: BLOCKER_SUGGESTION.to_string(),
            }),
        };
    }

    // Rule 6: sleeping, kept distinct from rule 5 for the retry planner.
    if snapshot.status_enum == SessionStatus::SuspendRequested {
        return PollResult::Blocked {
            patch: IssuePatch::blocked(BlockerInfo {
                what_happened: SLEEP_NARRATIVE.to_string(),
                suggestion: BLOCKER_SUGGESTION.to_string(),
            }),
        };
    }

    // Rule 7: keep polling at the interval matching the session kind.
    PollResult::Continue {
        next_poll: kind.into(),
    }
}

fn interpret_scoping_terminal(snapshot: &SessionSnapshot, ctx: &PollContext) -> PollResult {
    match &snapshot.structured_output {
        Some(raw) => {
            let result = parse_scoping_result(raw);
            let steps = steps_from_plan(&result);
            PollResult::Scoped {
                patch: IssuePatch::scoped(result, steps, ctx.now_unix_ms),
            }
        }
        // Closed without output: degrade to an unscoped-but-closed session.
        None => PollResult::Scoped {
            patch: IssuePatch::scoped_without_output(),
        },
    }
}

fn interpret_fixing_terminal(snapshot: &SessionSnapshot, ctx: &PollContext) -> PollResult {
    let reported_url = snapshot
        .pull_request
        .as_ref()
        .and_then(|pr| pr.url.as_deref());
    if let Some(url) = reported_url {
        let pr = parse_pr_url(url).map(|parsed| PrInfo {
            url: url.to_string(),
            owner: parsed.owner,
            repo: parsed.repo,
            number: parsed.number,
        });
        return PollResult::Done {
            patch: IssuePatch::done(pr, ctx.now_unix_ms),
        };
    }
    if snapshot.status_enum == SessionStatus::Stopped {
        return PollResult::Failed {
            patch: IssuePatch::failed(BlockerInfo {
                what_happened: snapshot.status.clone(),
                suggestion: BLOCKER_SUGGESTION.to_string(),
            }),
        };
    }
    // Finished with nothing to show: an explicit edge case, reported as a
    // successful completion with no PR.
    PollResult::Done {
        patch: IssuePatch::done(None, ctx.now_unix_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        interpret, parse_pr_url, PollCategory, PollContext, PollResult, PrRef, SLEEP_NARRATIVE,
    };
    use crate::issue::IssueStatus;
    use crate::scoping::Confidence;
    use crate::session::{SessionKind, SessionMessage, SessionSnapshot, SessionStatus};
    use serde_json::json;

    fn snapshot(status_enum: SessionStatus) -> SessionSnapshot {
        SessionSnapshot {
            id: "devin-1".to_string(),
            status_enum,
            status: status_enum.as_str().to_string(),
            created_at: None,
            updated_at: None,
            pull_request: None,
            structured_output: None,
            messages: Vec::new(),
        }
    }

    fn ctx() -> PollContext {
        PollContext {
            issue_number: 12,
            session_started_at_unix_ms: None,
            timeout_limit_ms: 30 * 60 * 1_000,
            now_unix_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn unit_working_session_past_budget_times_out_before_status_is_read() {
        let context = PollContext {
            session_started_at_unix_ms: Some(0),
            ..ctx()
        };
        let result = interpret(&snapshot(SessionStatus::Working), SessionKind::Fixing, &context);
        let PollResult::TimedOut { patch } = result else {
            panic!("expected timed_out, got {result:?}");
        };
        assert_eq!(patch.status, Some(IssueStatus::TimedOut));
    }

    #[test]
    fn unit_expired_times_out_even_inside_budget() {
        let context = PollContext {
            session_started_at_unix_ms: Some(ctx().now_unix_ms - 1_000),
            ..ctx()
        };
        let result = interpret(&snapshot(SessionStatus::Expired), SessionKind::Scoping, &context);
        assert!(matches!(result, PollResult::TimedOut { .. }));
    }

    #[test]
    fn functional_each_status_enum_maps_to_exactly_one_action_kind() {
        let cases = [
            (SessionStatus::Working, "continue"),
            (SessionStatus::Blocked, "blocked"),
            (SessionStatus::Finished, "done"),
            (SessionStatus::Stopped, "failed"),
            (SessionStatus::Expired, "timed_out"),
            (SessionStatus::SuspendRequested, "blocked"),
            (SessionStatus::Resumed, "continue"),
        ];
        for (status, expected) in cases {
            let result = interpret(&snapshot(status), SessionKind::Fixing, &ctx());
            let actual = match result {
                PollResult::Scoped { .. } => "scoped",
                PollResult::Done { .. } => "done",
                PollResult::Failed { .. } => "failed",
                PollResult::Blocked { .. } => "blocked",
                PollResult::TimedOut { .. } => "timed_out",
                PollResult::Continue { .. } => "continue",
            };
            assert_eq!(actual, expected, "status {status:?}");
        }
    }

    #[test]
    fn functional_finished_scoping_with_green_output_yields_scoped_patch() {
        let mut session = snapshot(SessionStatus::Finished);
        session.structured_output = Some(json!({
            "confidence": "green",
            "open_questions": [],
        }));
        let result = interpret(&session, SessionKind::Scoping, &ctx());
        let PollResult::Scoped { patch } = result else {
            panic!("expected scoped");
        };
        assert_eq!(patch.status, Some(IssueStatus::Scoped));
        assert_eq!(patch.confidence, Some(Confidence::Green));
        assert_eq!(patch.scoped_at_unix_ms, Some(ctx().now_unix_ms));
    }

    #[test]
    fn functional_early_structured_output_short_circuits_to_scoped() {
        let mut session = snapshot(SessionStatus::Working);
        session.structured_output = Some(json!({"confidence": "yellow"}));
        let result = interpret(&session, SessionKind::Scoping, &ctx());
        assert!(matches!(result, PollResult::Scoped { .. }));
    }

    #[test]
    fn unit_finished_scoping_without_output_degrades_to_bare_scoped() {
        let result = interpret(&snapshot(SessionStatus::Finished), SessionKind::Scoping, &ctx());
        let PollResult::Scoped { patch } = result else {
            panic!("expected scoped");
        };
        assert!(patch.confidence.is_none());
        assert!(patch.scoping.is_none());
    }

    #[test]
    fn functional_blocked_fixing_session_reads_latest_agent_message() {
        let mut session = snapshot(SessionStatus::Blocked);
        session.messages = vec![
            SessionMessage {
                role: "user".to_string(),
                text: "status?".to_string(),
            },
            SessionMessage {
                role: "devin".to_string(),
                text: "I need staging credentials".to_string(),
            },
        ];
        let result = interpret(&session, SessionKind::Fixing, &ctx());
        let PollResult::Blocked { patch } = result else {
            panic!("expected blocked");
        };
        let blocker = patch.blocker.expect("blocker should be set");
        assert_eq!(blocker.what_happened, "I need staging credentials");
        assert!(!blocker.suggestion.is_empty());
    }

    #[test]
    fn unit_blocked_without_messages_falls_back_to_raw_status_with_tags_stripped() {
        let mut session = snapshot(SessionStatus::Blocked);
        session.status = "[waiting] need input [urgent]".to_string();
        let result = interpret(&session, SessionKind::Fixing, &ctx());
        let PollResult::Blocked { patch } = result else {
            panic!("expected blocked");
        };
        assert_eq!(patch.blocker.expect("blocker").what_happened, "need input");
    }

    #[test]
    fn functional_suspend_requested_reports_sleep_narrative() {
        let result = interpret(
            &snapshot(SessionStatus::SuspendRequested),
            SessionKind::Fixing,
            &ctx(),
        );
        let PollResult::Blocked { patch } = result else {
            panic!("expected blocked");
        };
        let blocker = patch.blocker.expect("blocker");
        assert!(blocker.what_happened.contains("went to sleep"));
        assert_eq!(blocker.what_happened, SLEEP_NARRATIVE);
    }

    #[test]
    fn unit_continue_selects_poll_category_matching_kind() {
        let scoping = interpret(&snapshot(SessionStatus::Working), SessionKind::Scoping, &ctx());
        assert_eq!(
            scoping,
            PollResult::Continue {
                next_poll: PollCategory::Scoping
            }
        );
        let fixing = interpret(&snapshot(SessionStatus::Resumed), SessionKind::Fixing, &ctx());
        assert_eq!(
            fixing,
            PollResult::Continue {
                next_poll: PollCategory::Fixing
            }
        );
    }

    #[test]
    fn functional_finished_fixing_with_pr_url_parses_pr_open_patch() {
        let mut session = snapshot(SessionStatus::Finished);
        session.pull_request = Some(crate::session::SessionPullRequest {
            url: Some("https://github.com/octo/widgets/pull/42".to_string()),
        });
        let result = interpret(&session, SessionKind::Fixing, &ctx());
        let PollResult::Done { patch } = result else {
            panic!("expected done");
        };
        let pr = patch.pr.expect("pr should parse");
        assert_eq!(pr.owner, "octo");
        assert_eq!(pr.repo, "widgets");
        assert_eq!(pr.number, 42);
        assert_eq!(patch.completed_at_unix_ms, Some(ctx().now_unix_ms));
    }

    #[test]
    fn regression_malformed_pr_url_still_yields_done_with_null_pr() {
        let mut session = snapshot(SessionStatus::Finished);
        session.pull_request = Some(crate::session::SessionPullRequest {
            url: Some("https://github.com/octo/widgets/issues/42".to_string()),
        });
        let result = interpret(&session, SessionKind::Fixing, &ctx());
        let PollResult::Done { patch } = result else {
            panic!("expected done");
        };
        assert!(patch.pr.is_none());
        assert_eq!(patch.status, Some(IssueStatus::Done));
    }

    #[test]
    fn unit_stopped_fixing_session_fails_with_raw_status_blocker() {
        let mut session = snapshot(SessionStatus::Stopped);
        session.status = "stopped by operator".to_string();
        let result = interpret(&session, SessionKind::Fixing, &ctx());
        let PollResult::Failed { patch } = result else {
            panic!("expected failed");
        };
        assert_eq!(
            patch.blocker.expect("blocker").what_happened,
            "stopped by operator"
        );
    }

    #[test]
    fn unit_parse_pr_url_round_trips() {
        assert_eq!(
            parse_pr_url("https://github.com/o/r/pull/42"),
            Some(PrRef {
                owner: "o".to_string(),
                repo: "r".to_string(),
                number: 42,
            })
        );
        assert_eq!(parse_pr_url("https://github.com/o/r"), None);
        assert_eq!(parse_pr_url("https://github.com/o/r/issues/42"), None);
    }
}
