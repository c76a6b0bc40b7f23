use serde::{Deserialize, Serialize};

use super::transcript::TranscriptEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl SessionState {
    /// Pure transition check. `None` means the move is not allowed.
    ///
    /// Staying put is always allowed; `Error` only leaves through `Idle`.
    pub fn transition(self, to: SessionState) -> Option<SessionState> {
        use SessionState::*;
        let allowed = self == to
            || matches!(
                (self, to),
                (Idle, Connecting)
                    | (Connecting, Connected)
                    | (Connecting, Error)
                    | (Connected, Error)
                    | (Connecting, Idle)
                    | (Connected, Idle)
                    | (Error, Idle)
            );
        allowed.then_some(to)
    }

    /// A session (or an attempt at one) is holding resources.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// Everything the UI layer observes, published as one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub state: SessionState,
    pub error: Option<String>,
    pub transcripts: Vec<TranscriptEntry>,
    pub is_listening: bool,
    pub is_speaking: bool,
    pub user_speaking: bool,
}
