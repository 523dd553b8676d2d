use crate::state::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode audio payload: {0}")]
    Decode(String),
    #[error("Audio output unavailable: {0}")]
    Output(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Storage lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The server refused the credentials. Retrying will not help.
    #[error("Connection refused, check the API key: {0}")]
    Unauthorized(String),
    #[error("Failed to open the live stream: {0}")]
    Transport(String),
}

impl ConnectError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ConnectError::Unauthorized(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid session state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Failures reported by the lecture host when applying a tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("The session engine has stopped")]
    EngineStopped,
    #[error("Slide index {index} is out of range for a lecture of {count} slides")]
    SlideOutOfRange { index: usize, count: usize },
    #[error("Navigation was abandoned: {0}")]
    NavigationAbandoned(String),
}
