//! Attendance records.

use serde::{Deserialize, Serialize};

use crate::messages::{SubmissionResult, WireStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Submitted, no verdict yet. Only ever seen on the client.
    Pending,
    Verified,
    Rejected,
}

impl AttendanceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one account in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: String,
    pub account_id: String,
    pub status: AttendanceStatus,
    /// Reject reason code when `status` is rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub recorded_at_ms: i64,
}

impl AttendanceRecord {
    /// Record the verdict carried by a submission result.
    pub fn from_result(account_id: &str, result: &SubmissionResult) -> Self {
        let (status, reason) = match result.status() {
            WireStatus::Verified => (AttendanceStatus::Verified, None),
            WireStatus::Rejected => (AttendanceStatus::Rejected, Some(result.reason.clone())),
            WireStatus::Unspecified => (AttendanceStatus::Pending, None),
        };
        Self {
            session_id: result.session_id.clone(),
            account_id: account_id.to_string(),
            status,
            reason,
            recorded_at_ms: result.recorded_at_ms,
        }
    }
}
