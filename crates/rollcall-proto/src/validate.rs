//! Attendance packet validation.
//!
//! Five checks in a fixed order, stopping at the first failure:
//!
//! 1. nonce: known, issued for this session, still open, not expired
//! 2. signature: verifies under the device's current binding, and that
//!    device is bound to the claimed account
//! 3. liveness: claimed score meets the session threshold
//! 4. proximity: claimed RSSI is within the session bound
//! 5. duplicate: the account has no verified record in this session
//!
//! [`validate`] is pure: every piece of host state it needs is looked up
//! beforehand and passed in through [`ValidationContext`].

use rollcall_core::Score;
use rollcall_crypto::DeviceBindingAuthority;

use crate::class::FailureClass;
use crate::messages::AttendancePacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationStep {
    Nonce = 1,
    Signature = 2,
    Liveness = 3,
    Proximity = 4,
    Duplicate = 5,
}

impl ValidationStep {
    pub const ALL: [Self; 5] = [
        Self::Nonce,
        Self::Signature,
        Self::Liveness,
        Self::Proximity,
        Self::Duplicate,
    ];
}

/// Why a packet was rejected: the first failing check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("Unknown nonce")]
    UnknownNonce,

    #[error("Nonce was issued for another session")]
    SessionMismatch,

    #[error("Nonce already consumed")]
    NonceReplayed,

    #[error("Nonce was cancelled")]
    NonceCancelled,

    #[error("Nonce expired")]
    NonceExpired,

    #[error("Signature does not verify")]
    BadSignature,

    #[error("Device is not bound to the claimed account")]
    DeviceNotBound,

    #[error("Match score {score} below threshold {threshold}")]
    MatchBelowThreshold { score: Score, threshold: Score },

    #[error("Match score out of range")]
    ScoreOutOfRange,

    #[error("RSSI {rssi_dbm} dBm outside proximity bound {floor_dbm} dBm")]
    OutOfRange { rssi_dbm: i32, floor_dbm: i32 },

    #[error("Account already verified in this session")]
    Duplicate,
}

impl RejectReason {
    pub const fn step(&self) -> ValidationStep {
        match self {
            Self::UnknownNonce
            | Self::SessionMismatch
            | Self::NonceReplayed
            | Self::NonceCancelled
            | Self::NonceExpired => ValidationStep::Nonce,
            Self::BadSignature | Self::DeviceNotBound => ValidationStep::Signature,
            Self::MatchBelowThreshold { .. } | Self::ScoreOutOfRange => ValidationStep::Liveness,
            Self::OutOfRange { .. } => ValidationStep::Proximity,
            Self::Duplicate => ValidationStep::Duplicate,
        }
    }

    pub const fn class(&self) -> FailureClass {
        match self.step() {
            ValidationStep::Nonce | ValidationStep::Signature => FailureClass::Protocol,
            ValidationStep::Liveness => FailureClass::Biometric,
            ValidationStep::Proximity | ValidationStep::Duplicate => FailureClass::Policy,
        }
    }

    /// Stable machine-readable code, carried in `SubmissionResult.reason`
    /// and stored in the ledger.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownNonce => "unknown_nonce",
            Self::SessionMismatch => "session_mismatch",
            Self::NonceReplayed => "nonce_replayed",
            Self::NonceCancelled => "nonce_cancelled",
            Self::NonceExpired => "nonce_expired",
            Self::BadSignature => "bad_signature",
            Self::DeviceNotBound => "device_not_bound",
            Self::MatchBelowThreshold { .. } => "match_below_threshold",
            Self::ScoreOutOfRange => "score_out_of_range",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
    Open,
    Consumed,
    Cancelled,
    Expired,
}

/// The host's view of one issued nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceView {
    pub value: Vec<u8>,
    pub session_id: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
    pub state: NonceState,
}

/// Everything [`validate`] may consult.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub session_id: &'a str,
    pub now_ms: i64,
    /// Host's record for the packet's nonce, if any.
    pub nonce: Option<&'a NonceView>,
    pub authority: &'a DeviceBindingAuthority,
    pub liveness_threshold: Score,
    pub rssi_floor_dbm: i32,
    /// The claimed account already has a verified record in this session.
    pub already_verified: bool,
}

pub fn validate(packet: &AttendancePacket, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    check_nonce(packet, ctx)?;
    check_signature(packet, ctx)?;
    check_liveness(packet, ctx)?;
    check_proximity(packet, ctx)?;
    check_duplicate(ctx)
}

fn check_nonce(packet: &AttendancePacket, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let view = ctx
        .nonce
        .filter(|v| v.value == packet.nonce)
        .ok_or(RejectReason::UnknownNonce)?;
    if view.session_id != ctx.session_id || packet.session_id != ctx.session_id {
        return Err(RejectReason::SessionMismatch);
    }
    match view.state {
        NonceState::Consumed => Err(RejectReason::NonceReplayed),
        NonceState::Cancelled => Err(RejectReason::NonceCancelled),
        NonceState::Expired => Err(RejectReason::NonceExpired),
        NonceState::Open if ctx.now_ms > view.expires_at_ms => Err(RejectReason::NonceExpired),
        NonceState::Open => Ok(()),
    }
}

fn check_signature(packet: &AttendancePacket, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let device_id = packet.device_uuid().ok_or(RejectReason::BadSignature)?;
    let message = packet.claim().canonical_bytes();
    if !ctx.authority.verify(&device_id, &packet.signature, &message) {
        return Err(RejectReason::BadSignature);
    }
    if !ctx.authority.is_bound_to(&device_id, &packet.account_id) {
        return Err(RejectReason::DeviceNotBound);
    }
    Ok(())
}

fn check_liveness(packet: &AttendancePacket, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let score = packet.score().ok_or(RejectReason::ScoreOutOfRange)?;
    if score.meets(ctx.liveness_threshold) {
        Ok(())
    } else {
        Err(RejectReason::MatchBelowThreshold {
            score,
            threshold: ctx.liveness_threshold,
        })
    }
}

fn check_proximity(packet: &AttendancePacket, ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    let rssi_dbm = packet.rssi_at_capture;
    // Positive dBm is not a plausible received strength.
    if rssi_dbm > 0 || rssi_dbm < ctx.rssi_floor_dbm {
        return Err(RejectReason::OutOfRange {
            rssi_dbm,
            floor_dbm: ctx.rssi_floor_dbm,
        });
    }
    Ok(())
}

const fn check_duplicate(ctx: &ValidationContext<'_>) -> Result<(), RejectReason> {
    if ctx.already_verified {
        Err(RejectReason::Duplicate)
    } else {
        Ok(())
    }
}
