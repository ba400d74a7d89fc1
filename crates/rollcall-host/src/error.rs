//! Host error types.

use rollcall_core::db::DatabaseError;
use rollcall_proto::{CodecError, FailureClass, RadioError, SessionCode};

use crate::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Session {session_id} is already active on this host")]
    AlreadyActive { session_id: String },

    #[error("No session has been started on this host")]
    NoSession,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session code {0} is in use by an active session")]
    CodeInUse(SessionCode),

    #[error("Session has ended")]
    SessionEnded,

    #[error("Session is full ({capacity} attendees)")]
    SessionFull { capacity: usize },

    #[error("Session actor is gone")]
    ActorGone,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl HostError {
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::AlreadyActive { .. }
            | Self::NoSession
            | Self::UnknownSession(_)
            | Self::CodeInUse(_)
            | Self::SessionEnded
            | Self::SessionFull { .. } => FailureClass::Policy,
            Self::Ledger(_) => FailureClass::Protocol,
            Self::Codec(e) => e.class(),
            Self::ActorGone | Self::Database(_) | Self::Radio(_) => FailureClass::Transport,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
