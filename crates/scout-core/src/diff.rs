//! Unified-diff line classification for PR detail views.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
}

/// Classifies one line of a unified diff. The `+++`/`---` header pair and
/// `@@`/`diff `/`index ` metadata lines are context, not changes.
pub fn classify_diff_line(line: &str) -> DiffLineKind {
    if line.starts_with("+++") || line.starts_with("---") {
        return DiffLineKind::Context;
    }
    if line.starts_with("@@") || line.starts_with("diff ") || line.starts_with("index ") {
        return DiffLineKind::Context;
    }
    if line.starts_with('+') {
        return DiffLineKind::Added;
    }
    if line.starts_with('-') {
        return DiffLineKind::Removed;
    }
    DiffLineKind::Context
}

#[cfg(test)]
mod tests {
    use super::{classify_diff_line, DiffLineKind};

    #[test]
    fn unit_classify_diff_line_separates_changes_from_metadata() {
        assert_eq!(classify_diff_line("+let x = 1;"), DiffLineKind::Added);
        assert_eq!(classify_diff_line("-let x = 0;"), DiffLineKind::Removed);
        assert_eq!(classify_diff_line(" unchanged"), DiffLineKind::Context);
        assert_eq!(classify_diff_line("+++ b/src/lib.rs"), DiffLineKind::Context);
        assert_eq!(classify_diff_line("--- a/src/lib.rs"), DiffLineKind::Context);
        assert_eq!(classify_diff_line("@@ -1,4 +1,5 @@"), DiffLineKind::Context);
        assert_eq!(
            classify_diff_line("diff --git a/x b/x"),
            DiffLineKind::Context
        );
        assert_eq!(classify_diff_line("index abc..def 100644"), DiffLineKind::Context);
    }

    #[test]
    fn regression_bare_plus_and_minus_lines_count_as_changes() {
        assert_eq!(classify_diff_line("+"), DiffLineKind::Added);
        assert_eq!(classify_diff_line("-"), DiffLineKind::Removed);
    }
}
