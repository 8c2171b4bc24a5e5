use tokio::sync::{watch, RwLock, RwLockReadGuard};

/// Turn-taking state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    AwaitingResult,
    Playing,
    Completed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Error)
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Completed | Error, _) => false,
            (_, Error) => true,
            (Idle, Recording) => true,
            (Recording, AwaitingResult) => true,
            // Audio before the end-of-utterance marker implies the utterance is over.
            (Recording | AwaitingResult, Playing) => true,
            (Recording | AwaitingResult | Playing, Completed) => true,
            _ => false,
        }
    }
}

/// State shared by the two halves of a session.
///
/// The request side holds an emission permit while it writes a message, and
/// the response side takes the state lock exclusively to advance. Once an
/// advance out of `Recording` has returned, no further audio can be emitted.
pub struct TurnGate {
    state: watch::Sender<SessionState>,
    emission: RwLock<()>,
}

impl TurnGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            state,
            emission: RwLock::new(()),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.current() == SessionState::Recording
    }

    /// Moves to `next` if the state machine allows it. Returns whether the state changed.
    pub async fn advance(&self, next: SessionState) -> bool {
        let _exclusive = self.emission.write().await;
        let previous = self.current();
        if previous == next {
            return false;
        }
        if !previous.can_advance_to(next) {
            tracing::debug!("ignoring session transition {:?} -> {:?}", previous, next);
            return false;
        }
        self.state.send_replace(next);
        tracing::debug!("session state {:?} -> {:?}", previous, next);
        true
    }

    /// Held while a request is written; blocks concurrent transitions.
    pub async fn emission_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.emission.read().await
    }

    /// Resolves once the session is no longer recording.
    pub async fn left_recording(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx
            .wait_for(|state| *state != SessionState::Idle && *state != SessionState::Recording)
            .await;
    }
}

impl Default for TurnGate {
    fn default() -> Self {
        Self::new()
    }
}
