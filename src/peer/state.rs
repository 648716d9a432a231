/// Negotiation role of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Proposes first; usually the side holding the camera
    Initiator,
    /// Waits for an offer
    Responder,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// Peer session lifecycle.
///
/// `Closed` and `Failed` are terminal. There is no reconnecting state:
/// recovery means discarding the session and creating a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Negotiating, Connected)
                | (Idle, Closed)
                | (Negotiating, Closed)
                | (Connected, Closed)
                | (Negotiating, Failed)
                | (Connected, Failed)
        )
    }
}
