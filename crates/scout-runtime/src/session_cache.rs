//! Bounded-TTL cache binding an external session id to the issue it serves.
//!
//! Bridges the gap between session creation (which knows the issue) and a
//! later poll arriving with only the session id, without reaching through
//! process-global state; the poller falls back to the durable store when an
//! entry has expired.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use scout_core::SessionKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub issue_number: u64,
    pub kind: SessionKind,
}

pub struct SessionBindingCache {
    ttl: Duration,
    cap: usize,
    entries: Mutex<HashMap<String, (Instant, SessionBinding)>>,
}

impl SessionBindingCache {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self {
            ttl,
            cap: cap.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, session_id: &str, binding: SessionBinding) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();
        entries.retain(|_, (inserted, _)| now.duration_since(*inserted) <= self.ttl);
        if entries.len() >= self.cap {
            // Evict the stalest entry to stay bounded.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (inserted, _))| *inserted)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(session_id.to_string(), (now, binding));
    }

    pub fn get(&self, session_id: &str) -> Option<SessionBinding> {
        let mut entries = self.entries.lock().ok()?;
        let (inserted, binding) = entries.get(session_id)?;
        if Instant::now().duration_since(*inserted) > self.ttl {
            entries.remove(session_id);
            return None;
        }
        Some(binding.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
