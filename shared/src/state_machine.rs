//! Remote Session State Machine
//!
//! Defines the valid connection state transitions of a remote session and the
//! bounded retry that sits between `Connecting` and giving up.

/// Connection state of a remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the backoff delay before the next connect attempt
    Reconnecting,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Caller asked for a connection (or the retry delay elapsed)
    ConnectRequested,
    /// Transport is up and the node showed its prompt
    Established,
    /// One connect attempt failed
    AttemptFailed { reason: String },
    /// Read or write on an established link failed
    IoError { reason: String },
    /// Caller closed the session
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed)
    Success(SessionState),
    /// Transition was invalid from current state
    Invalid { from: SessionState, event: SessionEvent },
    /// Retry budget is exhausted; session is back to `Disconnected`
    GaveUp { attempts: u32, reason: String },
}

/// Connection state machine with a bounded attempt counter
#[derive(Debug)]
pub struct SessionStateMachine {
    current_state: SessionState,
    attempts: u32,
    max_attempts: u32,
}

impl SessionStateMachine {
    /// Create a disconnected state machine allowing `max_attempts` connects
    /// per connection cycle (at least one)
    pub fn new(max_attempts: u32) -> Self {
        Self {
            current_state: SessionState::Disconnected,
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Attempts made in the current connection cycle
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == SessionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        use SessionEvent::*;
        use SessionState::*;

        match (self.current_state, &event) {
            (_, DisconnectRequested) => {
                self.current_state = Disconnected;
                self.attempts = 0;
                TransitionResult::Success(Disconnected)
            }

            (Connected, ConnectRequested) => TransitionResult::Success(Connected),

            // A new cycle starts from Disconnected; a retry from Reconnecting
            (Disconnected, ConnectRequested) => {
                self.attempts = 1;
                self.current_state = Connecting;
                TransitionResult::Success(Connecting)
            }
            (Reconnecting, ConnectRequested) => {
                self.attempts += 1;
                self.current_state = Connecting;
                TransitionResult::Success(Connecting)
            }

            (Connecting, Established) => {
                self.attempts = 0;
                self.current_state = Connected;
                TransitionResult::Success(Connected)
            }

            (Connecting, AttemptFailed { reason }) => {
                if self.attempts >= self.max_attempts {
                    let attempts = self.attempts;
                    self.attempts = 0;
                    self.current_state = Disconnected;
                    TransitionResult::GaveUp {
                        attempts,
                        reason: reason.clone(),
                    }
                } else {
                    self.current_state = Reconnecting;
                    TransitionResult::Success(Reconnecting)
                }
            }

            (Connected, IoError { .. }) => {
                self.current_state = Disconnected;
                TransitionResult::Success(Disconnected)
            }

            _ => TransitionResult::Invalid {
                from: self.current_state,
                event: event.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> SessionEvent {
        SessionEvent::AttemptFailed {
            reason: "connection refused".into(),
        }
    }

    #[test]
    fn test_initial_state() {
        let fsm = SessionStateMachine::new(3);
        assert_eq!(fsm.state(), SessionState::Disconnected);
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_connect_flow() {
        let mut fsm = SessionStateMachine::new(3);

        let result = fsm.process_event(SessionEvent::ConnectRequested);
        assert_eq!(result, TransitionResult::Success(SessionState::Connecting));

        let result = fsm.process_event(SessionEvent::Established);
        assert_eq!(result, TransitionResult::Success(SessionState::Connected));
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_retry_then_connect() {
        let mut fsm = SessionStateMachine::new(3);
        fsm.process_event(SessionEvent::ConnectRequested);

        let result = fsm.process_event(failed());
        assert_eq!(result, TransitionResult::Success(SessionState::Reconnecting));

        fsm.process_event(SessionEvent::ConnectRequested);
        assert_eq!(fsm.state(), SessionState::Connecting);
        assert_eq!(fsm.attempts(), 2);

        fsm.process_event(SessionEvent::Established);
        assert_eq!(fsm.state(), SessionState::Connected);
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut fsm = SessionStateMachine::new(2);
        fsm.process_event(SessionEvent::ConnectRequested);
        fsm.process_event(failed());
        fsm.process_event(SessionEvent::ConnectRequested);

        let result = fsm.process_event(failed());
        assert!(matches!(result, TransitionResult::GaveUp { attempts: 2, .. }));
        assert_eq!(fsm.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_io_error_drops_link() {
        let mut fsm = SessionStateMachine::new(1);
        fsm.process_event(SessionEvent::ConnectRequested);
        fsm.process_event(SessionEvent::Established);

        let result = fsm.process_event(SessionEvent::IoError {
            reason: "broken pipe".into(),
        });
        assert_eq!(result, TransitionResult::Success(SessionState::Disconnected));
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = SessionStateMachine::new(3);

        // Can't be established without connecting first
        let result = fsm.process_event(SessionEvent::Established);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut fsm = SessionStateMachine::new(3);
        let result = fsm.process_event(SessionEvent::DisconnectRequested);
        assert_eq!(result, TransitionResult::Success(SessionState::Disconnected));
        let result = fsm.process_event(SessionEvent::DisconnectRequested);
        assert_eq!(result, TransitionResult::Success(SessionState::Disconnected));
    }
}
