//! Call session identity and lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle states of a bridged call.
///
/// Transitions are linear: `Connecting → Active → Closing → Closed`, with
/// the one shortcut that a session may begin closing before it ever became
/// active (e.g. the realtime connection failed during setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Attempted lifecycle transition that is not allowed.
#[derive(Debug, thiserror::Error)]
#[error("invalid session transition: {from:?} -> {to:?}")]
pub struct SessionStateError {
    pub from: SessionState,
    pub to: SessionState,
}

/// One active bridged call.
///
/// Owned exclusively by the bridge task that created it; destroyed when
/// either side's socket closes or an unrecoverable protocol error occurs.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub id: Uuid,
    pub stream_sid: String,
    pub started_at: DateTime<Utc>,
    state: SessionState,
}

impl CallSession {
    /// Creates a session in the `Connecting` state for a telephony stream.
    pub fn new(stream_sid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_sid: stream_sid.into(),
            started_at: Utc::now(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `Connecting → Active`, once the realtime session is configured.
    pub fn activate(&mut self) -> Result<(), SessionStateError> {
        self.transition(SessionState::Active)
    }

    /// `Connecting | Active → Closing`, when either peer starts tearing down.
    pub fn begin_close(&mut self) -> Result<(), SessionStateError> {
        self.transition(SessionState::Closing)
    }

    /// `Closing → Closed`, after the realtime client has been shut down.
    pub fn finish_close(&mut self) -> Result<(), SessionStateError> {
        self.transition(SessionState::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionStateError> {
        use SessionState::*;
        let allowed = matches!(
            (self.state, to),
            (Connecting, Active) | (Connecting, Closing) | (Active, Closing) | (Closing, Closed)
        );
        if !allowed {
            return Err(SessionStateError {
                from: self.state,
                to,
            });
        }
        tracing::debug!(session_id = %self.id, from = ?self.state, to = ?to, "Session transition");
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_connecting() {
        let session = CallSession::new("MZ123");
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.stream_sid, "MZ123");
        assert!(!session.is_closed());
    }

    #[test]
    fn full_lifecycle_is_accepted() {
        let mut session = CallSession::new("MZ123");
        session.activate().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        session.begin_close().unwrap();
        assert_eq!(session.state(), SessionState::Closing);
        session.finish_close().unwrap();
        assert!(session.is_closed());
    }

    #[test]
    fn setup_failure_may_close_without_activating() {
        let mut session = CallSession::new("MZ123");
        session.begin_close().unwrap();
        session.finish_close().unwrap();
        assert!(session.is_closed());
    }

    #[test]
    fn double_activate_is_rejected() {
        let mut session = CallSession::new("MZ123");
        session.activate().unwrap();
        let err = session.activate().unwrap_err();
        assert_eq!(err.from, SessionState::Active);
        assert_eq!(err.to, SessionState::Active);
    }

    #[test]
    fn closed_session_cannot_reopen() {
        let mut session = CallSession::new("MZ123");
        session.activate().unwrap();
        session.begin_close().unwrap();
        session.finish_close().unwrap();
        assert!(session.activate().is_err());
        assert!(session.begin_close().is_err());
        assert!(session.finish_close().is_err());
    }

    #[test]
    fn state_serializes_snake_case() {
        let state = serde_json::to_value(SessionState::Connecting).unwrap();
        assert_eq!(state, serde_json::json!("connecting"));
    }
}
