//! Database rows.

use serde::{Deserialize, Serialize};

use rollcall_proto::AttendanceStatus;

use super::db::DatabaseError;
use crate::ledger::LedgerEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub code: String,
    pub host_device_id: String,
    pub course_id: String,
    pub room: Option<String>,
    pub session_public_key: String,
    pub liveness_threshold: i64,
    pub rssi_floor_dbm: i64,
    pub started_at: i64,
    pub stopped_at: Option<i64>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub session_id: String,
    pub sequence: i64,
    pub account_id: String,
    pub device_id: String,
    pub nonce: String,
    pub liveness_score: i64,
    pub rssi_at_capture: i64,
    pub client_timestamp: i64,
    pub status: String,
    pub reason: Option<String>,
    pub recorded_at: i64,
    pub prev_hash: String,
    pub hash: String,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str| {
            DatabaseError::Corrupt(format!(
                "ledger entry {}#{}: bad {field}",
                row.session_id, row.sequence
            ))
        };
        Ok(Self {
            sequence: u64::try_from(row.sequence).map_err(|_| corrupt("sequence"))?,
            liveness_score: u32::try_from(row.liveness_score)
                .map_err(|_| corrupt("liveness_score"))?,
            rssi_at_capture: i32::try_from(row.rssi_at_capture)
                .map_err(|_| corrupt("rssi_at_capture"))?,
            status: AttendanceStatus::parse(&row.status).ok_or_else(|| corrupt("status"))?,
            client_timestamp_ms: row.client_timestamp,
            recorded_at_ms: row.recorded_at,
            session_id: row.session_id,
            account_id: row.account_id,
            device_id: row.device_id,
            nonce: row.nonce,
            reason: row.reason,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}
