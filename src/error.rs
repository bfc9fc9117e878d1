// src/error.rs
use thiserror::Error;

use crate::skeleton::BodyId;

/// Failures of a single pointing request. None of them is fatal; each leaves
/// session state as it was before the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointingError {
    #[error("no bodies in the current sensor frame")]
    NoBodiesInFrame,

    #[error("no untracked body performed the activation gesture")]
    NoGestureFound,

    #[error("the classifier has no training data")]
    NoTrainingData,

    #[error("the aim ray does not hit the room boundaries")]
    NoHit,

    #[error("no session registered for client {0}")]
    SessionNotFound(String),

    #[error("unknown device {0}")]
    DeviceNotFound(String),

    #[error("device id {0} is already in use")]
    DuplicateDevice(String),

    #[error("session {0} has no tracked body")]
    NotTracking(String),

    #[error("client {0} is already registered")]
    SessionExists(String),

    #[error("body {0} is not in the current frame")]
    BodyNotVisible(BodyId),
}

impl PointingError {
    /// Message shown to the user for this failure.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::NoBodiesInFrame => "Nobody is visible to the sensor. Step into view and try again.",
            Self::NoGestureFound => "Gesture not detected. Raise one arm above your shoulder and hold it.",
            Self::NoTrainingData => "No device positions have been trained yet.",
            Self::NoHit => "Your arm is not pointing at a wall. Please try again.",
            Self::SessionNotFound(_) => "Please register first.",
            Self::DeviceNotFound(_) => "Device not found.",
            Self::DuplicateDevice(_) => "A device with this id already exists.",
            Self::NotTracking(_) => "Please activate gesture control first.",
            Self::SessionExists(_) => "You are already registered.",
            Self::BodyNotVisible(_) => "You are no longer visible to the sensor.",
        }
    }

    /// Tracking failures keep the session registered and can be retried by the caller.
    pub fn is_tracking_failure(&self) -> bool {
        matches!(self, Self::NoBodiesInFrame | Self::NoGestureFound)
    }
}

pub type PointingResult<T> = Result<T, PointingError>;
