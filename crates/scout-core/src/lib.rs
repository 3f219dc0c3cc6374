//! Pure reconciliation core for the Scout issue-triage dashboard.
//!
//! Everything in this crate is deterministic and free of I/O: the status
//! interpreter that turns a raw session poll into a dashboard action, the
//! retry planner that picks wake-in-place versus recreate, the comment
//! formatters with self-authorship and near-duplicate detection, and the
//! pure issue-state transition function the runtime applies patches through.

mod diff;
mod interpreter;
mod issue;
mod retry;
mod scoping;
mod session;
mod templates;
mod time_utils;

pub use diff::{classify_diff_line, DiffLineKind};
pub use interpreter::{
    interpret, parse_pr_url, PollCategory, PollContext, PollResult, PrRef,
};
pub use issue::{
    apply_patch, BlockerInfo, DashboardIssue, IssuePatch, IssueStatus, PrInfo, SessionInfo,
    StepItem,
};
pub use retry::{build_recreate_context, build_wake_message, decide, RetryDecision};
pub use scoping::{parse_scoping_result, steps_from_plan, Confidence, ScopingResult};
pub use session::{
    is_terminal, SessionKind, SessionMessage, SessionPullRequest, SessionSnapshot, SessionStatus,
};
pub use templates::{
    blocked_comment, done_comment, green_scoped_comment, is_duplicate, is_self_authored,
    normalize_comment_text, ready_after_clarification_comment, scoping_question_comment,
    DUPLICATE_WINDOW_MS, SELF_AUTHOR_MARKER,
};
pub use time_utils::parse_rfc3339_to_unix_ms;
