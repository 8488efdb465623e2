use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to the user. None of them is fatal: each one ends the
/// current attempt and leaves the controller back in `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoraError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection succeeded without a media channel")]
    MissingChannel,
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("disconnected: {0}")]
    RemoteDisconnect(String),
    #[error("disconnect timed out after {0:?}")]
    DisconnectTimeout(Duration),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("connection controller is closed")]
    Closed,
}

/// Failure reported by the signaling client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SignalingError {
    pub message: String,
}

impl SignalingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<SignalingError> for SoraError {
    fn from(e: SignalingError) -> Self {
        SoraError::Connect(e.message)
    }
}
