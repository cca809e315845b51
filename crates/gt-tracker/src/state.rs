use std::fmt;

use gt_core::types::SessionState;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Transitions kept in [`SessionStateMachine::history`]; older ones are dropped.
pub const HISTORY_LIMIT: usize = 32;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Start,
    Engaged,
    Denied,
    Stop,
    Released,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionEvent::Start => "Start",
            SessionEvent::Engaged => "Engaged",
            SessionEvent::Denied => "Denied",
            SessionEvent::Stop => "Stop",
            SessionEvent::Released => "Released",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition {
        state: SessionState,
        event: SessionEvent,
    },
}

// ---------------------------------------------------------------------------
// SessionStateMachine
// ---------------------------------------------------------------------------

/// Lifecycle of the tracking session:
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`.
///
/// Every accepted transition is pushed to a `watch` channel so observers can
/// read the current state without going through the controller's lock.
#[derive(Debug)]
pub struct SessionStateMachine {
    current: SessionState,
    history: Vec<(SessionState, SessionEvent, SessionState)>,
    tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    /// Create a new state machine starting in `Stopped`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Stopped);
        Self {
            current: SessionState::Stopped,
            history: Vec::new(),
            tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.current
    }

    /// The most recent transitions, oldest first, at most [`HISTORY_LIMIT`].
    pub fn history(&self) -> &[(SessionState, SessionEvent, SessionState)] {
        &self.history
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Attempt a state transition driven by `event`.
    ///
    /// Valid transitions:
    /// - Stopped  + Start    -> Starting
    /// - Starting + Engaged  -> Running
    /// - Starting + Denied   -> Stopped
    /// - Starting + Stop     -> Stopping
    /// - Running  + Stop     -> Stopping
    /// - Stopping + Released -> Stopped
    pub fn transition(&mut self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        let next = match (self.current, event) {
            (SessionState::Stopped, SessionEvent::Start) => SessionState::Starting,
            (SessionState::Starting, SessionEvent::Engaged) => SessionState::Running,
            (SessionState::Starting, SessionEvent::Denied) => SessionState::Stopped,
            (SessionState::Starting, SessionEvent::Stop) => SessionState::Stopping,
            (SessionState::Running, SessionEvent::Stop) => SessionState::Stopping,
            (SessionState::Stopping, SessionEvent::Released) => SessionState::Stopped,
            _ => {
                return Err(TransitionError::InvalidTransition {
                    state: self.current,
                    event,
                });
            }
        };

        let from = self.current;
        self.current = next;
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push((from, event, next));
        self.tx.send_replace(next);
        tracing::debug!(from = %from, event = %event, to = %next, "session state transition");
        Ok(next)
    }

    pub fn can_transition(&self, event: SessionEvent) -> bool {
        matches!(
            (self.current, event),
            (SessionState::Stopped, SessionEvent::Start)
                | (SessionState::Starting, SessionEvent::Engaged)
                | (SessionState::Starting, SessionEvent::Denied)
                | (SessionState::Starting, SessionEvent::Stop)
                | (SessionState::Running, SessionEvent::Stop)
                | (SessionState::Stopping, SessionEvent::Released)
        )
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Stopped);
        assert_eq!(sm.transition(SessionEvent::Start).unwrap(), SessionState::Starting);
        assert_eq!(sm.transition(SessionEvent::Engaged).unwrap(), SessionState::Running);
        assert_eq!(sm.transition(SessionEvent::Stop).unwrap(), SessionState::Stopping);
        assert_eq!(sm.transition(SessionEvent::Released).unwrap(), SessionState::Stopped);
        assert_eq!(sm.history().len(), 4);
    }

    #[test]
    fn denied_returns_to_stopped() {
        let mut sm = SessionStateMachine::new();
        sm.transition(SessionEvent::Start).unwrap();
        assert_eq!(sm.transition(SessionEvent::Denied).unwrap(), SessionState::Stopped);
    }

    #[test]
    fn start_while_running_is_rejected() {
        let mut sm = SessionStateMachine::new();
        sm.transition(SessionEvent::Start).unwrap();
        sm.transition(SessionEvent::Engaged).unwrap();
        let err = sm.transition(SessionEvent::Start).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                state: SessionState::Running,
                event: SessionEvent::Start,
            }
        );
        assert_eq!(sm.state(), SessionState::Running);
    }

    #[test]
    fn history_is_bounded() {
        let mut sm = SessionStateMachine::new();
        for _ in 0..20 {
            for event in [
                SessionEvent::Start,
                SessionEvent::Engaged,
                SessionEvent::Stop,
                SessionEvent::Released,
            ] {
                sm.transition(event).unwrap();
            }
        }
        assert_eq!(sm.history().len(), HISTORY_LIMIT);
        assert_eq!(
            sm.history().last(),
            Some(&(SessionState::Stopping, SessionEvent::Released, SessionState::Stopped))
        );
    }

    #[test]
    fn stop_from_stopped_is_invalid() {
        let sm = SessionStateMachine::new();
        assert!(!sm.can_transition(SessionEvent::Stop));
        assert!(sm.can_transition(SessionEvent::Start));
    }

    #[test]
    fn watchers_see_every_state() {
        let mut sm = SessionStateMachine::new();
        let rx = sm.subscribe();
        sm.transition(SessionEvent::Start).unwrap();
        assert_eq!(*rx.borrow(), SessionState::Starting);
        sm.transition(SessionEvent::Engaged).unwrap();
        assert_eq!(*rx.borrow(), SessionState::Running);
    }
}
