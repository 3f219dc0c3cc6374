//! Retry planner: wake a still-addressable blocked session in place, or
//! recreate a fresh session carrying a paraphrase of the prior context.
//!
//! A blocked session with a live fixing-session id has the agent waiting
//! synchronously for input, so a message to that session resumes it with
//! full context at near-zero cost. Every other stalled state has no
//! addressable listener and must be recreated.

use crate::issue::{BlockerInfo, DashboardIssue, IssueStatus};

const CONTINUE_FALLBACK: &str = "Please continue working on this fix.";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Computed on demand by the retry button handler; never stored.
pub enum RetryDecision {
    Wake {
        session_id: String,
        message: String,
    },
    Recreate {
        previous_context: Option<String>,
        /// Old session id so the caller can terminate it first. Advisory;
        /// the planner performs no I/O itself.
        session_id: Option<String>,
    },
}

/// Composes the message delivered to a woken session.
pub fn build_wake_message(blocker: Option<&BlockerInfo>, pending_user_text: Option<&str>) -> String {
    match (blocker, pending_user_text) {
        (Some(blocker), Some(text)) => format!(
            "The user responded to your blocker ('{}').\nTheir guidance: '{}'.\nPlease continue working on the fix.",
            blocker.what_happened, text
        ),
        (None, Some(text)) => format!(
            "Additional guidance provided: '{}'. Please continue working on the fix.",
            text
        ),
        (Some(blocker), None) => format!(
            "Previous blocker: '{}'. Please continue working on the fix.",
            blocker.what_happened
        ),
        (None, None) => CONTINUE_FALLBACK.to_string(),
    }
}

/// Paraphrases prior context into the opening prompt of a recreated session.
/// Returns `None` when there is nothing worth carrying over.
pub fn build_recreate_context(
    blocker: Option<&BlockerInfo>,
    pending_user_text: Option<&str>,
) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(blocker) = blocker {
        if !blocker.what_happened.is_empty() {
            lines.push(format!(
                "A previous session asked: '{}'",
                blocker.what_happened
            ));
        }
        if !blocker.suggestion.is_empty() {
            lines.push(format!("The suggestion was: '{}'", blocker.suggestion));
        }
    }
    if let Some(text) = pending_user_text {
        lines.push(format!("The user responded: '{text}'"));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Wake iff the issue is `blocked` and a fixing-session id exists; every
/// other combination recreates.
pub fn decide(issue: &DashboardIssue, pending_user_text: Option<&str>) -> RetryDecision {
    let fixing_session_id = issue
        .fixing_session
        .as_ref()
        .map(|session| session.session_id.clone());
    match (issue.status, fixing_session_id) {
        (IssueStatus::Blocked, Some(session_id)) => RetryDecision::Wake {
            session_id,
            message: build_wake_message(issue.blocker.as_ref(), pending_user_text),
        },
        (_, session_id) => RetryDecision::Recreate {
            previous_context: build_recreate_context(issue.blocker.as_ref(), pending_user_text),
            session_id,
        },
    }
}
