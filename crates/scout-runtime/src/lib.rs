//! Stateful orchestration for Scout: the comment bridge that ferries agent
//! questions and human replies between the session and the issue thread,
//! and the poll scheduler that paces both reconciliation loops.

mod bridge;
mod clock;
mod inflight;
mod issue_table;
mod notices;
mod schedule;
mod scheduler;
mod session_cache;

pub use bridge::CommentBridge;
pub use inflight::{InflightPermit, InflightTable};
pub use issue_table::{IssueTable, SharedIssueTable};
pub use notices::{NoticeHub, ServiceOrigin, UserNotice};
pub use schedule::{schedule_after, ScheduledTask};
pub use scheduler::{PollIntervals, PollScheduler, PollSchedulerConfig};
pub use session_cache::{SessionBinding, SessionBindingCache};
