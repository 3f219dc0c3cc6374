//! User-visible notices surfaced by the reconciliation loops: auth banners
//! keyed by service of origin, one-time toasts, and session-expiry errors.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOrigin {
    AgentService,
    IssueTracker,
}

impl ServiceOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentService => "agent service",
            Self::IssueTracker => "issue tracker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    /// Dismissible banner for an authentication failure; never silently
    /// retried.
    AuthBanner {
        origin: ServiceOrigin,
        message: String,
    },
    Toast {
        message: String,
    },
    SessionExpired {
        session_id: String,
        message: String,
    },
}

#[derive(Clone)]
pub struct NoticeHub {
    tx: mpsc::UnboundedSender<UserNotice>,
}

impl NoticeHub {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UserNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivery is best-effort; a dropped receiver must not disturb the
    /// state machine the notice accompanies.
    pub fn publish(&self, notice: UserNotice) {
        if self.tx.send(notice).is_err() {
            tracing::debug!("user notice dropped: no subscriber");
        }
    }

    pub fn auth_banner(&self, origin: ServiceOrigin, message: impl Into<String>) {
        self.publish(UserNotice::AuthBanner {
            origin,
            message: message.into(),
        });
    }

    pub fn toast(&self, message: impl Into<String>) {
        self.publish(UserNotice::Toast {
            message: message.into(),
        });
    }

    pub fn session_expired(&self, session_id: impl Into<String>, message: impl Into<String>) {
        self.publish(UserNotice::SessionExpired {
            session_id: session_id.into(),
            message: message.into(),
        });
    }
}
