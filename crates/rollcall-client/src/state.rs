//! Client state machine.
//!
//! `Idle → Scanning → Found → Connecting → LivenessCheck → Submitting →
//! Completed`, with `Failed` reachable from every non-terminal state. The
//! machine is driven by discrete completion events; [`transition`] is pure
//! and all I/O lives in [`crate::client`].

use rollcall_proto::{FailureClass, RefusalReason};

/// Why a join attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    RadioUnavailable,
    SessionNotFound,
    ConnectionLost,
    Refused(RefusalReason),
    /// The host answered with something unverifiable.
    Protocol,
    LivenessFailed,
    MatchBelowThreshold,
    SubmissionFailed,
    Cancelled,
}

impl FailureCause {
    pub const fn class(self) -> FailureClass {
        match self {
            Self::RadioUnavailable | Self::ConnectionLost | Self::SubmissionFailed => {
                FailureClass::Transport
            }
            Self::Protocol => FailureClass::Protocol,
            Self::LivenessFailed | Self::MatchBelowThreshold => FailureClass::Biometric,
            Self::SessionNotFound | Self::Refused(_) | Self::Cancelled => FailureClass::Policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Idle,
    Scanning,
    Found,
    Connecting,
    LivenessCheck,
    Submitting,
    Completed,
    Failed(FailureCause),
}

impl ClientState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Found => "found",
            Self::Connecting => "connecting",
            Self::LivenessCheck => "liveness_check",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(cause) => write!(f, "failed ({cause:?})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    ScanStarted,
    SessionSelected,
    ConnectStarted,
    NonceReceived,
    LivenessPassed,
    /// A stale or lost nonce was replaced by a fresh one.
    NonceRefreshed,
    ResultReceived,
    Fail(FailureCause),
    Cancel,
    /// Start over after a terminal state.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("No transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: ClientState,
    pub event: ClientEvent,
}

pub fn transition(
    state: ClientState,
    event: ClientEvent,
) -> Result<ClientState, InvalidTransition> {
    use ClientEvent as E;
    use ClientState as S;

    let next = match (state, event) {
        (S::Idle, E::ScanStarted) => S::Scanning,
        (S::Scanning, E::SessionSelected) => S::Found,
        (S::Found, E::ConnectStarted) => S::Connecting,
        (S::Connecting, E::NonceReceived) => S::LivenessCheck,
        (S::LivenessCheck, E::LivenessPassed) => S::Submitting,
        (S::Submitting, E::NonceRefreshed) => S::Submitting,
        (S::Submitting, E::ResultReceived) => S::Completed,
        (s, E::Fail(cause)) if !s.is_terminal() => S::Failed(cause),
        (s, E::Cancel) if !s.is_terminal() => S::Failed(FailureCause::Cancelled),
        (S::Completed | S::Failed(_), E::Reset) => S::Idle,
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}
