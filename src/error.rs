use thiserror::Error;

/// Errors produced by the voice session subsystem.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Microphone access denied: {0}")]
    Permission(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error classes. Only `Permission` and `Transport` reach the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Permission,
    Transport,
    Decode,
    Configuration,
    Internal,
}

impl VoiceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Permission(_) => ErrorClass::Permission,
            Self::Transport(_) | Self::Io(_) => ErrorClass::Transport,
            Self::Decode(_) | Self::Encode(_) | Self::Serialization(_) => ErrorClass::Decode,
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Device(_) | Self::InvalidState(_) => ErrorClass::Internal,
        }
    }

    /// Whether this error should surface as a user-visible session failure.
    pub fn is_user_visible(&self) -> bool {
        matches!(self.class(), ErrorClass::Permission | ErrorClass::Transport)
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
