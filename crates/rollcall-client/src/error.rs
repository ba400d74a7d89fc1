//! Client error types.

use rollcall_biometric::{BiometricError, CaptureError};
use rollcall_core::Score;
use rollcall_proto::{CodecError, FailureClass, RadioError, RefusalReason};

use crate::state::{ClientState, FailureCause};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Radio unavailable")]
    RadioUnavailable,

    #[error("No session advertising code {0}")]
    SessionNotFound(String),

    #[error("Connection lost before the host answered")]
    ConnectionLost,

    #[error("Host refused the connection: {reason:?} {detail}")]
    Refused {
        reason: RefusalReason,
        detail: String,
    },

    #[error("Host sent an invalid {0}")]
    InvalidResponse(&'static str),

    #[error("Liveness check failed after {attempts} attempt(s)")]
    LivenessFailed { attempts: u32 },

    #[error("Match score {score} below threshold {threshold}")]
    MatchBelowThreshold { score: Score, threshold: Score },

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Biometric error: {0}")]
    Biometric(#[from] BiometricError),

    #[error("Radio error: {0}")]
    Radio(RadioError),

    #[error("History error: {0}")]
    History(#[from] rollcall_core::Error),
}

impl From<RadioError> for ClientError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::Unavailable => Self::RadioUnavailable,
            RadioError::ConnectionLost => Self::ConnectionLost,
            other => Self::Radio(other),
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Radio(radio) => radio.into(),
            CodecError::Decode(_) | CodecError::TooLarge(_) | CodecError::Empty => {
                Self::InvalidResponse("frame")
            }
        }
    }
}

impl ClientError {
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::RadioUnavailable
            | Self::ConnectionLost
            | Self::SubmissionFailed(_)
            | Self::Radio(_)
            | Self::History(_) => FailureClass::Transport,
            Self::InvalidResponse(_) => FailureClass::Protocol,
            Self::LivenessFailed { .. }
            | Self::MatchBelowThreshold { .. }
            | Self::Capture(_)
            | Self::Biometric(_) => FailureClass::Biometric,
            Self::SessionNotFound(_)
            | Self::Refused { .. }
            | Self::Cancelled
            | Self::InvalidState { .. } => FailureClass::Policy,
        }
    }

    /// The failure this error leaves the state machine in.
    pub fn cause(&self) -> FailureCause {
        match self {
            Self::RadioUnavailable => FailureCause::RadioUnavailable,
            Self::SessionNotFound(_) => FailureCause::SessionNotFound,
            Self::ConnectionLost | Self::Radio(_) => FailureCause::ConnectionLost,
            Self::Refused { reason, .. } => FailureCause::Refused(*reason),
            Self::InvalidResponse(_) => FailureCause::Protocol,
            Self::LivenessFailed { .. } | Self::Capture(_) | Self::Biometric(_) => {
                FailureCause::LivenessFailed
            }
            Self::MatchBelowThreshold { .. } => FailureCause::MatchBelowThreshold,
            Self::SubmissionFailed(_) | Self::History(_) => FailureCause::SubmissionFailed,
            Self::Cancelled | Self::InvalidState { .. } => FailureCause::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
