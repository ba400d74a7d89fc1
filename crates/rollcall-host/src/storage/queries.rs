//! Ledger database queries.

use super::db::{DatabaseError, LedgerDatabase};
use super::models::{LedgerEntryRow, SessionRow};
use crate::ledger::{LedgerEntry, verify_entries};
use crate::session::{SessionInfo, StopReason};

impl LedgerDatabase {
    // =========================================================================
    // Session queries
    // =========================================================================

    /// Record a newly started session.
    pub async fn insert_session(&self, info: &SessionInfo) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO sessions (id, code, host_device_id, course_id, room,
                                  session_public_key, liveness_threshold, rssi_floor_dbm,
                                  started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&info.session_id)
        .bind(info.code.as_str())
        .bind(info.host_device_id.to_string())
        .bind(&info.metadata.course_id)
        .bind(info.metadata.room.as_deref())
        .bind(&info.session_public_key)
        .bind(i64::from(info.policy.liveness_threshold.basis_points()))
        .bind(i64::from(info.policy.rssi_floor_dbm))
        .bind(info.started_at_ms)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Mark a session stopped. A session is only ever stopped once.
    pub async fn mark_session_stopped(
        &self,
        id: &str,
        stopped_at_ms: i64,
        reason: &StopReason,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sessions SET stopped_at = ?, stop_reason = ? WHERE id = ? AND stopped_at IS NULL",
        )
        .bind(stopped_at_ms)
        .bind(reason.to_string())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionRow, DatabaseError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session {id}")))
    }

    /// Sessions, newest first.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Ledger queries
    // =========================================================================

    /// Append one ledger entry.
    pub async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), DatabaseError> {
        let sequence = i64::try_from(entry.sequence)
            .map_err(|_| DatabaseError::Query(format!("sequence {} overflows", entry.sequence)))?;

        sqlx::query(
            r"
            INSERT INTO ledger_entries (session_id, sequence, account_id, device_id, nonce,
                                        liveness_score, rssi_at_capture, client_timestamp,
                                        status, reason, recorded_at, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&entry.session_id)
        .bind(sequence)
        .bind(&entry.account_id)
        .bind(&entry.device_id)
        .bind(&entry.nonce)
        .bind(i64::from(entry.liveness_score))
        .bind(i64::from(entry.rssi_at_capture))
        .bind(entry.client_timestamp_ms)
        .bind(entry.status.as_str())
        .bind(entry.reason.as_deref())
        .bind(entry.recorded_at_ms)
        .bind(&entry.prev_hash)
        .bind(&entry.hash)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// All entries of a session in append order.
    pub async fn entries_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            "SELECT * FROM ledger_entries WHERE session_id = ? ORDER BY sequence ASC",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    /// Reload a session's entries and check their hash chain.
    pub async fn load_verified_entries(
        &self,
        session_id: &str,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let entries = self.entries_for_session(session_id).await?;
        verify_entries(&entries).map_err(|e| DatabaseError::Corrupt(e.to_string()))?;
        tracing::debug!(session_id, entries = entries.len(), "Ledger chain verified");
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::session::{SessionMetadata, SessionPolicy};
    use rollcall_proto::{AttendancePacket, RejectReason, SessionCode};
    use uuid::Uuid;

    fn info(id: &str) -> SessionInfo {
        SessionInfo {
            session_id: id.into(),
            code: SessionCode::parse("AB12CD").unwrap(),
            host_device_id: Uuid::new_v4(),
            metadata: SessionMetadata {
                course_id: "CS101".into(),
                room: Some("B-204".into()),
            },
            policy: SessionPolicy::default(),
            session_public_key: "00".repeat(32),
            started_at_ms: 1_000,
        }
    }

    fn packet(account: &str) -> AttendancePacket {
        AttendancePacket {
            session_id: "s-1".into(),
            account_id: account.into(),
            device_id: Uuid::new_v4().to_string(),
            nonce: vec![3; 16],
            liveness_score: 9300,
            rssi_at_capture: -45,
            client_timestamp_ms: 900,
            signature: vec![],
        }
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let db = LedgerDatabase::open_in_memory().await.unwrap();
        db.insert_session(&info("s-1")).await.unwrap();

        let row = db.get_session("s-1").await.unwrap();
        assert_eq!(row.code, "AB12CD");
        assert_eq!(row.liveness_threshold, 8500);
        assert!(row.stopped_at.is_none());

        db.mark_session_stopped("s-1", 2_000, &StopReason::Requested)
            .await
            .unwrap();
        db.mark_session_stopped("s-1", 3_000, &StopReason::AdvertiserFault("x".into()))
            .await
            .unwrap();
        let row = db.get_session("s-1").await.unwrap();
        assert_eq!(row.stopped_at, Some(2_000));

        assert_eq!(db.list_sessions(10).await.unwrap().len(), 1);
        assert!(matches!(
            db.get_session("missing").await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn entries_round_trip_with_intact_chain() {
        let db = LedgerDatabase::open_in_memory().await.unwrap();
        db.insert_session(&info("s-1")).await.unwrap();

        let mut ledger = Ledger::new("s-1");
        let (a, _) = ledger.append(&packet("alice"), &Ok(()), 1_000).unwrap();
        let (b, _) = ledger
            .append(&packet("alice"), &Err(RejectReason::Duplicate), 1_001)
            .unwrap();
        db.append_entry(&a).await.unwrap();
        db.append_entry(&b).await.unwrap();

        let loaded = db.load_verified_entries("s-1").await.unwrap();
        assert_eq!(loaded, ledger.entries());
    }

    #[tokio::test]
    async fn entries_cannot_be_rewritten() {
        let db = LedgerDatabase::open_in_memory().await.unwrap();
        db.insert_session(&info("s-1")).await.unwrap();
        let mut ledger = Ledger::new("s-1");
        let (entry, _) = ledger.append(&packet("alice"), &Ok(()), 1_000).unwrap();
        db.append_entry(&entry).await.unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET status = 'rejected'")
            .execute(db.pool())
            .await;
        assert!(update.is_err());
        assert!(db.append_entry(&entry).await.is_err());
    }
}
