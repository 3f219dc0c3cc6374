//! In-memory table of dashboard issues for one repository. The poll loop is
//! the sole mutator of session/blocker/PR fields; user-action handlers are
//! the sole mutator of message fields, so a plain mutex suffices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use scout_core::{apply_patch, DashboardIssue, IssuePatch};

#[derive(Default)]
pub struct IssueTable {
    issues: HashMap<u64, DashboardIssue>,
}

pub type SharedIssueTable = Arc<Mutex<IssueTable>>;

impl IssueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedIssueTable {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Creates the issue in `pending` state on first sight.
    pub fn ensure(&mut self, issue_number: u64) -> &mut DashboardIssue {
        self.issues
            .entry(issue_number)
            .or_insert_with(|| DashboardIssue::pending(issue_number))
    }

    pub fn get(&self, issue_number: u64) -> Option<&DashboardIssue> {
        self.issues.get(&issue_number)
    }

    pub fn snapshot(&self, issue_number: u64) -> Option<DashboardIssue> {
        self.issues.get(&issue_number).cloned()
    }

    /// Applies a named patch through the pure transition function and
    /// returns the pre- and post-states.
    pub fn apply(&mut self, issue_number: u64, patch: &IssuePatch) -> (DashboardIssue, DashboardIssue) {
        let pre = self.ensure(issue_number).clone();
        let next = apply_patch(&pre, patch);
        self.issues.insert(issue_number, next.clone());
        (pre, next)
    }

    pub fn all(&self) -> impl Iterator<Item = &DashboardIssue> {
        self.issues.values()
    }
}

#[cfg(test)]
mod tests {
    use super::IssueTable;
    use scout_core::{IssuePatch, IssueStatus};

    #[test]
    fn unit_ensure_creates_pending_once() {
        let mut table = IssueTable::new();
        table.ensure(4);
        table.ensure(4);
        assert_eq!(table.all().count(), 1);
        assert_eq!(table.get(4).expect("issue").status, IssueStatus::Pending);
    }

    #[test]
    fn functional_apply_returns_pre_and_post_states() {
        let mut table = IssueTable::new();
        let (pre, post) = table.apply(9, &IssuePatch::timed_out());
        assert_eq!(pre.status, IssueStatus::Pending);
        assert_eq!(post.status, IssueStatus::TimedOut);
        assert_eq!(table.get(9).expect("issue").status, IssueStatus::TimedOut);
    }
}
