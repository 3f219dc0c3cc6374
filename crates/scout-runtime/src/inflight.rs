//! Per-issue re-entrancy guard: an explicit lock table with RAII permits,
//! released on every exit path including panics in the holder's scope.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct InflightTable {
    inner: Arc<Mutex<HashSet<u64>>>,
}

pub struct InflightPermit {
    issue_number: u64,
    table: Arc<Mutex<HashSet<u64>>>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another permit for the same issue is live.
    pub fn acquire(&self, issue_number: u64) -> Option<InflightPermit> {
        let mut held = self.inner.lock().ok()?;
        if !held.insert(issue_number) {
            return None;
        }
        Some(InflightPermit {
            issue_number,
            table: Arc::clone(&self.inner),
        })
    }

    pub fn is_inflight(&self, issue_number: u64) -> bool {
        self.inner
            .lock()
            .map(|held| held.contains(&issue_number))
            .unwrap_or(false)
    }
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        if let Ok(mut held) = self.table.lock() {
            held.remove(&self.issue_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InflightTable;

    #[test]
    fn unit_second_acquire_for_same_issue_is_refused() {
        let table = InflightTable::new();
        let permit = table.acquire(12).expect("first acquire");
        assert!(table.acquire(12).is_none());
        assert!(table.acquire(13).is_some());
        drop(permit);
        assert!(table.acquire(12).is_some());
    }

    #[test]
    fn functional_permit_releases_on_early_exit() {
        let table = InflightTable::new();
        fn guarded(table: &InflightTable) -> Option<()> {
            let _permit = table.acquire(7)?;
            // Early return still releases through Drop.
            None
        }
        assert!(guarded(&table).is_none());
        assert!(!table.is_inflight(7));
    }
}
