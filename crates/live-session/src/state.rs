//! Session lifecycle state machine.
//!
//! The current state is published on a `watch` channel so any number of
//! observers can follow it without holding the engine.

use crate::error::TransitionError;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    /// Connected, microphone open, nobody talking.
    Ready,
    /// The model is producing audio or transcript.
    Lecturing,
    /// The student is talking or interrupted the model.
    Listening,
    /// The stream closed without the user asking for it.
    Disconnected,
    Ended,
    Error,
}

impl SessionState {
    /// Connected with an open conversation.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Lecturing | SessionState::Listening
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // start() is always allowed and tears down whatever was there.
            (_, Connecting) => true,
            (_, Ended) => true,
            (Connecting, Ready) => true,
            (from, Ready | Lecturing | Listening) => from.is_live(),
            (Connecting | Ready | Lecturing | Listening, Disconnected) => true,
            (Connecting | Ready | Lecturing | Listening | Disconnected, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Lecturing => "lecturing",
            SessionState::Listening => "listening",
            SessionState::Disconnected => "disconnected",
            SessionState::Ended => "ended",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    tx: watch::Sender<SessionState>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Moves to `next`. Returns `Ok(false)` when already there.
    pub fn transition(&mut self, next: SessionState) -> Result<bool, TransitionError> {
        let from = self.state;
        if from == next {
            return Ok(false);
        }
        if !from.can_transition_to(next) {
            tracing::warn!(%from, to = %next, "Rejected session state transition");
            return Err(TransitionError { from, to: next });
        }
        self.state = next;
        tracing::info!(%from, to = %next, "Session state transition");
        self.tx.send_replace(next);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = SessionStateMachine::new();
        let rx = machine.subscribe();
        for next in [
            SessionState::Connecting,
            SessionState::Ready,
            SessionState::Lecturing,
            SessionState::Listening,
            SessionState::Ready,
            SessionState::Ended,
        ] {
            assert_eq!(machine.transition(next), Ok(true));
            assert_eq!(*rx.borrow(), next);
        }
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.transition(SessionState::Idle), Ok(false));
    }

    #[test]
    fn test_rejects_live_states_before_connecting() {
        let mut machine = SessionStateMachine::new();
        let err = machine.transition(SessionState::Lecturing).unwrap_err();
        assert_eq!(err.from, SessionState::Idle);
        assert_eq!(err.to, SessionState::Lecturing);
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.transition(SessionState::Disconnected).is_err());
    }

    #[test]
    fn test_error_is_recoverable_by_reconnect() {
        let mut machine = SessionStateMachine::new();
        machine.transition(SessionState::Connecting).unwrap();
        machine.transition(SessionState::Error).unwrap();
        assert!(machine.transition(SessionState::Ready).is_err());
        assert_eq!(machine.transition(SessionState::Connecting), Ok(true));
    }

    #[test]
    fn test_disconnected_only_reconnects_or_ends() {
        assert!(SessionState::Disconnected.can_transition_to(SessionState::Connecting));
        assert!(SessionState::Disconnected.can_transition_to(SessionState::Ended));
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Ended.can_transition_to(SessionState::Disconnected));
    }
}
