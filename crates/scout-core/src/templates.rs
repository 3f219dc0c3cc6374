//! Markdown comment bodies posted to the issue thread, plus the marker-based
//! self-authorship check and the near-duplicate check the inbound bridge
//! relies on.

use crate::issue::PrInfo;
use crate::scoping::ScopingResult;

/// Literal marker embedded in every comment footer. Self-authorship is an
/// O(1) substring check against this, no parsing.
pub const SELF_AUTHOR_MARKER: &str = "Posted by Scout";

/// Default window for the near-duplicate timestamp check.
pub const DUPLICATE_WINDOW_MS: u64 = 60_000;

fn footer() -> String {
    format!("\n\n---\n_{SELF_AUTHOR_MARKER}, the issue triage agent._")
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Question comment for a yellow/red scoping result with open questions.
pub fn scoping_question_comment(result: &ScopingResult) -> String {
    let mut body = String::from(
        "I've scoped this issue but need clarification before starting a fix.\n\n",
    );
    if !result.confidence_reason.is_empty() {
        body.push_str(&format!("**Why:** {}\n\n", result.confidence_reason));
    }
    body.push_str("**Open questions:**\n");
    body.push_str(&bullet_list(&result.open_questions));
    body.push_str("\n\nReply to this comment and I'll re-scope with your answers.");
    body.push_str(&footer());
    body
}

/// Confirmation posted when clarification answers produced a green re-scope.
pub fn ready_after_clarification_comment(result: &ScopingResult) -> String {
    let mut body = String::from(
        "Thanks for the clarification. I'm now confident in the scope and ready to start the fix.\n\n",
    );
    if !result.requested_fix.is_empty() {
        body.push_str(&format!("**Planned fix:** {}\n", result.requested_fix));
    }
    if !result.action_plan.is_empty() {
        body.push_str("\n**Plan:**\n");
        body.push_str(&bullet_list(&result.action_plan));
    }
    body.push_str(&footer());
    body
}

/// Plain summary for a green scoping result with no prior conversation.
pub fn green_scoped_comment(result: &ScopingResult) -> String {
    let mut body = String::from("I've scoped this issue and I'm confident in the fix.\n\n");
    if !result.requested_fix.is_empty() {
        body.push_str(&format!("**Planned fix:** {}\n", result.requested_fix));
    }
    if !result.files_to_modify.is_empty() {
        body.push_str("\n**Files to modify:**\n");
        body.push_str(&bullet_list(&result.files_to_modify));
        body.push('\n');
    }
    if !result.action_plan.is_empty() {
        body.push_str("\n**Plan:**\n");
        body.push_str(&bullet_list(&result.action_plan));
    }
    body.push_str(&footer());
    body
}

/// Posted the first time a fixing session reports a blocker.
pub fn blocked_comment(what_happened: &str) -> String {
    format!(
        "The fix session hit a blocker and needs input:\n\n> {what_happened}\n\nReply here with guidance, or retry from the dashboard.{}",
        footer()
    )
}

/// Completion comment; carries the PR link when one was opened.
pub fn done_comment(pr: Option<&PrInfo>) -> String {
    let body = match pr {
        Some(pr) => format!(
            "The fix is ready for review: [{}/{}#{}]({})",
            pr.owner, pr.repo, pr.number, pr.url
        ),
        None => "The fix session completed without opening a pull request.".to_string(),
    };
    format!("{body}{}", footer())
}

/// True iff the body contains the footer marker substring.
pub fn is_self_authored(body: &str) -> bool {
    body.contains(SELF_AUTHOR_MARKER)
}

/// Trim, lowercase, and collapse internal whitespace runs to single spaces.
pub fn normalize_comment_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Near-duplicate check: normalized equality AND timestamps within the
/// window, both required. Guards against an optimistic local echo of a
/// just-sent message being re-forwarded when the same poll retrieves it.
pub fn is_duplicate(
    new_text: &str,
    existing_text: &str,
    new_timestamp_ms: u64,
    existing_timestamp_ms: u64,
    window_ms: u64,
) -> bool {
    if normalize_comment_text(new_text) != normalize_comment_text(existing_text) {
        return false;
    }
    new_timestamp_ms.abs_diff(existing_timestamp_ms) <= window_ms
}

#[cfg(test)]
mod tests {
    use super::{
        blocked_comment, done_comment, green_scoped_comment, is_duplicate, is_self_authored,
        normalize_comment_text, ready_after_clarification_comment, scoping_question_comment,
        DUPLICATE_WINDOW_MS, SELF_AUTHOR_MARKER,
    };
    use crate::issue::PrInfo;
    use crate::scoping::{Confidence, ScopingResult};

    fn yellow_result() -> ScopingResult {
        ScopingResult {
            confidence: Some(Confidence::Yellow),
            confidence_reason: "two possible root causes".to_string(),
            requested_fix: "guard the nil case".to_string(),
            open_questions: vec![
                "which environment?".to_string(),
                "is the legacy path still live?".to_string(),
            ],
            action_plan: vec!["add guard".to_string()],
            ..ScopingResult::default()
        }
    }

    #[test]
    fn unit_every_formatter_ends_with_the_marker_footer() {
        let result = yellow_result();
        let pr = PrInfo {
            url: "https://github.com/o/r/pull/9".to_string(),
            owner: "o".to_string(),
            repo: "r".to_string(),
            number: 9,
        };
        for body in [
            scoping_question_comment(&result),
            ready_after_clarification_comment(&result),
            green_scoped_comment(&result),
            blocked_comment("need credentials"),
            done_comment(Some(&pr)),
            done_comment(None),
        ] {
            assert!(body.contains(SELF_AUTHOR_MARKER), "missing marker: {body}");
            assert!(is_self_authored(&body));
        }
    }

    #[test]
    fn unit_scoping_question_comment_lists_all_open_questions() {
        let body = scoping_question_comment(&yellow_result());
        assert!(body.contains("- which environment?"));
        assert!(body.contains("- is the legacy path still live?"));
    }

    #[test]
    fn unit_done_comment_carries_pr_link_when_present() {
        let pr = PrInfo {
            url: "https://github.com/o/r/pull/9".to_string(),
            owner: "o".to_string(),
            repo: "r".to_string(),
            number: 9,
        };
        assert!(done_comment(Some(&pr)).contains("https://github.com/o/r/pull/9"));
        assert!(done_comment(None).contains("without opening a pull request"));
    }

    #[test]
    fn unit_is_self_authored_is_false_for_human_text() {
        assert!(!is_self_authored("thanks, please use the sandbox env"));
    }

    #[test]
    fn unit_normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_comment_text("  Use   the\tSandbox\n env  "),
            "use the sandbox env"
        );
    }

    #[test]
    fn functional_is_duplicate_requires_both_text_and_window() {
        let base = 1_700_000_000_000_u64;
        assert!(is_duplicate("same", "  SAME ", base, base + 59_000, DUPLICATE_WINDOW_MS));
        assert!(is_duplicate("same", "same", base, base + 60_000, DUPLICATE_WINDOW_MS));
        assert!(!is_duplicate("same", "same", base, base + 61_000, DUPLICATE_WINDOW_MS));
        assert!(!is_duplicate("same", "different", base, base, DUPLICATE_WINDOW_MS));
    }

    #[test]
    fn regression_is_duplicate_window_is_symmetric() {
        let base = 1_700_000_000_000_u64;
        assert!(is_duplicate("same", "same", base + 59_000, base, DUPLICATE_WINDOW_MS));
        assert!(!is_duplicate("same", "same", base + 61_000, base, DUPLICATE_WINDOW_MS));
    }
}
