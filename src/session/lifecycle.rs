//! Lifecycle broadcast payloads for the dial state machine.

use std::time::SystemTime;

use super::RecordingSession;

/// Phases a dial attempt moves through. `Rejected` is terminal: the caller
/// must start a new dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPhase {
    Idle,
    PermissionPending,
    SecurityPending,
    BlacklistCheck,
    Active,
    Finalizing,
    Rejected,
}

impl DialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialPhase::Idle => "idle",
            DialPhase::PermissionPending => "permission_pending",
            DialPhase::SecurityPending => "security_pending",
            DialPhase::BlacklistCheck => "blacklist_check",
            DialPhase::Active => "active",
            DialPhase::Finalizing => "finalizing",
            DialPhase::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum LifecyclePayload {
    #[default]
    None,
    Rejected(RejectionPayload),
    Completed(CompletionPayload),
}

#[derive(Debug, Clone)]
pub struct RejectionPayload {
    pub reason: &'static str,
}

/// Final summary for a completed attempt. `record_id` is absent when the
/// call stayed below the recording threshold.
#[derive(Debug, Clone)]
pub struct CompletionPayload {
    pub session: RecordingSession,
    pub record_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionLifecycleUpdate {
    pub session_id: String,
    pub phase: DialPhase,
    pub issued_at: SystemTime,
    pub payload: LifecyclePayload,
}

impl SessionLifecycleUpdate {
    pub fn new<S: Into<String>>(session_id: S, phase: DialPhase) -> Self {
        Self {
            session_id: session_id.into(),
            phase,
            issued_at: SystemTime::now(),
            payload: LifecyclePayload::None,
        }
    }

    pub fn rejected<S: Into<String>>(session_id: S, reason: &'static str) -> Self {
        Self {
            session_id: session_id.into(),
            phase: DialPhase::Rejected,
            issued_at: SystemTime::now(),
            payload: LifecyclePayload::Rejected(RejectionPayload { reason }),
        }
    }

    /// The attempt is over and the machine is back at `Idle`.
    pub fn completed<S: Into<String>>(
        session_id: S,
        session: RecordingSession,
        record_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phase: DialPhase::Idle,
            issued_at: SystemTime::now(),
            payload: LifecyclePayload::Completed(CompletionPayload { session, record_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn rejected_helper_carries_reason() {
        let update = SessionLifecycleUpdate::rejected("attempt-1", "blacklisted");
        assert_eq!(update.phase, DialPhase::Rejected);
        match update.payload {
            LifecyclePayload::Rejected(payload) => assert_eq!(payload.reason, "blacklisted"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn completed_helper_returns_to_idle() {
        let session = RecordingSession {
            id: "attempt-2".to_string(),
            phone_number: "+15555550100".to_string(),
            start_time: Utc::now(),
            duration_seconds: 200,
            is_active: false,
        };
        let update =
            SessionLifecycleUpdate::completed("attempt-2", session, Some("record-1".into()));

        assert_eq!(update.phase, DialPhase::Idle);
        match update.payload {
            LifecyclePayload::Completed(payload) => {
                assert_eq!(payload.session.duration_seconds, 200);
                assert_eq!(payload.record_id.as_deref(), Some("record-1"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn phase_labels_are_stable() {
        assert_eq!(DialPhase::PermissionPending.as_str(), "permission_pending");
        assert_eq!(DialPhase::Rejected.as_str(), "rejected");
    }
}
