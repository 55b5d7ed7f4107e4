//! Error taxonomy of the live-call core.
//!
//! Transport and device crates report failures as [`ConnectError`] and
//! [`AcquisitionError`]; the call manager normalizes everything it surfaces
//! into [`LiveCallError`].

use std::time::Duration;

/// The voice backend could not be reached or rejected the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectError {
    message: String,
}

impl ConnectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The local microphone is missing, busy, or permission was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AcquisitionError {
    message: String,
}

impl AcquisitionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Every failure the UI consumer can observe through `LiveCall::error`.
///
/// The display string is the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveCallError {
    #[error("{0}")]
    Acquisition(String),
    #[error("{0}")]
    Connect(String),
    #[error("{0}")]
    AbnormalClosure(String),
    #[error("Connection timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

impl From<ConnectError> for LiveCallError {
    fn from(err: ConnectError) -> Self {
        LiveCallError::Connect(err.message)
    }
}

impl From<AcquisitionError> for LiveCallError {
    fn from(err: AcquisitionError) -> Self {
        LiveCallError::Acquisition(err.message)
    }
}
