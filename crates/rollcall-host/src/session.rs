//! Session types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rollcall_core::Score;
use rollcall_core::config::PolicyConfig;
use rollcall_proto::SessionCode;

/// Course and room the session is for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub course_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Acceptance policy, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub liveness_threshold: Score,
    pub rssi_floor_dbm: i32,
    /// Maximum number of verified attendees, counting open nonces.
    pub capacity: Option<usize>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for SessionPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            liveness_threshold: Score::from_f64(config.liveness_threshold),
            rssi_floor_dbm: config.rssi_floor_dbm,
            capacity: config.capacity,
        }
    }
}

/// Public description of a started session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub code: SessionCode,
    pub host_device_id: Uuid,
    pub metadata: SessionMetadata,
    pub policy: SessionPolicy,
    /// Hex-encoded Ed25519 session key that signs nonces and results.
    pub session_public_key: String,
    pub started_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    AdvertiserFault(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Requested => "requested",
            Self::AdvertiserFault(_) => "advertiser_fault",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("stopped by host"),
            Self::AdvertiserFault(detail) => write!(f, "advertiser fault: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub code: SessionCode,
    /// Distinct accounts with a record in this session.
    pub record_count: usize,
    pub verified: usize,
    pub rejected: usize,
    /// Ledger entries, including superseded rejections.
    pub entry_count: usize,
    /// `None` while the session is active.
    pub reason: Option<StopReason>,
    pub stopped_at_ms: Option<i64>,
}

impl SessionSummary {
    pub const fn is_stopped(&self) -> bool {
        self.reason.is_some()
    }
}
