//! Client-side attendance history.
//!
//! One entry per session the device tried to join. An entry is `pending`
//! from the moment a packet is sent until a signed result arrives; if the
//! submission fails for good it stays pending so the backend can reconcile
//! it later.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use rollcall_proto::{AttendanceRecord, AttendanceStatus};

/// Per-status counts over the whole history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub verified: usize,
    pub rejected: usize,
    pub pending: usize,
}

impl HistoryStats {
    /// Verified sessions as a whole percentage of all sessions, rounded.
    /// `None` for an empty history.
    pub fn attendance_rate(&self) -> Option<u32> {
        if self.total == 0 {
            return None;
        }
        let rate = (self.verified * 200 + self.total) / (self.total * 2);
        u32::try_from(rate).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceHistory {
    records: HashMap<String, AttendanceRecord>,
}

impl AttendanceHistory {
    /// Load from a JSON file. A missing file is an empty history.
    pub fn load(path: &Path) -> rollcall_core::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> rollcall_core::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Note that a packet for `session_id` is in flight. A settled verdict
    /// is never reset to pending.
    pub fn mark_pending(&mut self, session_id: &str, account_id: &str, at_ms: i64) {
        self.records
            .entry(session_id.to_string())
            .and_modify(|r| {
                if r.status == AttendanceStatus::Rejected {
                    r.status = AttendanceStatus::Pending;
                    r.reason = None;
                    r.recorded_at_ms = at_ms;
                }
            })
            .or_insert_with(|| AttendanceRecord {
                session_id: session_id.to_string(),
                account_id: account_id.to_string(),
                status: AttendanceStatus::Pending,
                reason: None,
                recorded_at_ms: at_ms,
            });
    }

    /// Apply a verdict from the host. A verified entry is final.
    pub fn resolve(&mut self, record: AttendanceRecord) -> &AttendanceRecord {
        let session_id = record.session_id.clone();
        let entry = self
            .records
            .entry(session_id)
            .or_insert_with(|| record.clone());
        if entry.status != AttendanceStatus::Verified {
            *entry = record;
        }
        entry
    }

    pub fn get(&self, session_id: &str) -> Option<&AttendanceRecord> {
        self.records.get(session_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records
            .values()
            .filter(|r| r.status == AttendanceStatus::Pending)
    }

    /// All entries, oldest first.
    pub fn records(&self) -> Vec<&AttendanceRecord> {
        let mut all: Vec<_> = self.records.values().collect();
        all.sort_by(|a, b| {
            a.recorded_at_ms
                .cmp(&b.recorded_at_ms)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        all
    }

    pub fn stats(&self) -> HistoryStats {
        self.records.values().fold(
            HistoryStats {
                total: self.records.len(),
                ..HistoryStats::default()
            },
            |mut stats, record| {
                match record.status {
                    AttendanceStatus::Verified => stats.verified += 1,
                    AttendanceStatus::Rejected => stats.rejected += 1,
                    AttendanceStatus::Pending => stats.pending += 1,
                }
                stats
            },
        )
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn verdict(session: &str, status: AttendanceStatus, at: i64) -> AttendanceRecord {
        AttendanceRecord {
            session_id: session.into(),
            account_id: "alice".into(),
            status,
            reason: (status == AttendanceStatus::Rejected).then(|| "nonce_expired".into()),
            recorded_at_ms: at,
        }
    }

    #[test]
    fn pending_then_verified() {
        let mut history = AttendanceHistory::default();
        history.mark_pending("s-1", "alice", 1);
        assert_eq!(history.pending().count(), 1);

        history.resolve(verdict("s-1", AttendanceStatus::Verified, 2));
        assert_eq!(history.pending().count(), 0);
        assert_eq!(
            history.get("s-1").unwrap().status,
            AttendanceStatus::Verified
        );
    }

    #[test]
    fn verified_is_final() {
        let mut history = AttendanceHistory::default();
        history.resolve(verdict("s-1", AttendanceStatus::Verified, 2));
        history.mark_pending("s-1", "alice", 3);
        let after = history.resolve(verdict("s-1", AttendanceStatus::Rejected, 4));
        assert_eq!(after.status, AttendanceStatus::Verified);
        assert_eq!(after.recorded_at_ms, 2);
    }

    #[test]
    fn rejected_can_be_retried() {
        let mut history = AttendanceHistory::default();
        history.resolve(verdict("s-1", AttendanceStatus::Rejected, 2));
        history.mark_pending("s-1", "alice", 3);
        assert_eq!(history.get("s-1").unwrap().status, AttendanceStatus::Pending);
        assert_eq!(history.get("s-1").unwrap().reason, None);
    }

    #[test]
    fn stats_count_each_status() {
        let mut history = AttendanceHistory::default();
        assert_eq!(history.stats().attendance_rate(), None);

        history.resolve(verdict("s-1", AttendanceStatus::Verified, 1));
        history.resolve(verdict("s-2", AttendanceStatus::Verified, 2));
        history.resolve(verdict("s-3", AttendanceStatus::Rejected, 3));
        history.mark_pending("s-4", "alice", 4);

        let stats = history.stats();
        assert_eq!(
            stats,
            HistoryStats {
                total: 4,
                verified: 2,
                rejected: 1,
                pending: 1,
            }
        );
        assert_eq!(stats.attendance_rate(), Some(50));

        history.resolve(verdict("s-4", AttendanceStatus::Verified, 5));
        assert_eq!(history.stats().attendance_rate(), Some(75));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        assert!(AttendanceHistory::load(&path).unwrap().is_empty());

        let mut history = AttendanceHistory::default();
        history.mark_pending("s-2", "alice", 5);
        history.resolve(verdict("s-1", AttendanceStatus::Verified, 1));
        history.save(&path).unwrap();

        let loaded = AttendanceHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        let order: Vec<_> = loaded.records().iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(order, ["s-1", "s-2"]);
    }
}
