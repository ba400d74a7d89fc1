//! Attendance ledger.
//!
//! An append-only log of every validated packet, accepted or not, plus the
//! per-account record index derived from it. Each entry commits to its
//! predecessor with `SHA-256(prev_hash || entry body)`, so editing, dropping
//! or reordering entries after the fact is detectable with
//! [`Ledger::verify_chain`].
//!
//! A verified record never changes. A rejected record is replaced by a later
//! verdict for the same account; the rejected entry stays in the log.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use rollcall_proto::{AttendancePacket, AttendanceRecord, AttendanceStatus, RejectReason};

const GENESIS_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Account {0} already has a verified record")]
    AlreadyVerified(String),

    #[error("Hash chain broken at entry {sequence}")]
    ChainBroken { sequence: u64 },
}

/// One appended verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub session_id: String,
    pub account_id: String,
    pub device_id: String,
    pub nonce: String,
    /// Claimed score in basis points.
    pub liveness_score: u32,
    pub rssi_at_capture: i32,
    pub client_timestamp_ms: i64,
    pub status: AttendanceStatus,
    pub reason: Option<String>,
    pub recorded_at_ms: i64,
    pub prev_hash: String,
    pub hash: String,
}

/// The hashed part of an entry.
#[derive(Serialize)]
struct EntryBody<'a> {
    sequence: u64,
    session_id: &'a str,
    account_id: &'a str,
    device_id: &'a str,
    nonce: &'a str,
    liveness_score: u32,
    rssi_at_capture: i32,
    client_timestamp_ms: i64,
    status: AttendanceStatus,
    reason: Option<&'a str>,
    recorded_at_ms: i64,
}

impl LedgerEntry {
    fn body(&self) -> EntryBody<'_> {
        EntryBody {
            sequence: self.sequence,
            session_id: &self.session_id,
            account_id: &self.account_id,
            device_id: &self.device_id,
            nonce: &self.nonce,
            liveness_score: self.liveness_score,
            rssi_at_capture: self.rssi_at_capture,
            client_timestamp_ms: self.client_timestamp_ms,
            status: self.status,
            reason: self.reason.as_deref(),
            recorded_at_ms: self.recorded_at_ms,
        }
    }

    fn compute_hash(&self, prev: &[u8]) -> Option<String> {
        let body = serde_json::to_vec(&self.body()).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(prev);
        hasher.update(&body);
        Some(hex::encode(hasher.finalize()))
    }

    pub fn record(&self) -> AttendanceRecord {
        AttendanceRecord {
            session_id: self.session_id.clone(),
            account_id: self.account_id.clone(),
            status: self.status,
            reason: self.reason.clone(),
            recorded_at_ms: self.recorded_at_ms,
        }
    }
}

/// Check the hash chain of a sequence of entries, e.g. after reloading them
/// from storage.
pub fn verify_entries(entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    let mut prev = GENESIS_HASH.to_vec();
    for (expected_sequence, entry) in (0u64..).zip(entries) {
        let broken = LedgerError::ChainBroken {
            sequence: entry.sequence,
        };
        if entry.sequence != expected_sequence || entry.prev_hash != hex::encode(&prev) {
            return Err(broken);
        }
        if entry.compute_hash(&prev).as_deref() != Some(entry.hash.as_str()) {
            return Err(broken);
        }
        prev = hex::decode(&entry.hash).map_err(|_| broken)?;
    }
    Ok(())
}

/// The ledger of one session.
#[derive(Debug)]
pub struct Ledger {
    session_id: String,
    entries: Vec<LedgerEntry>,
    records: HashMap<String, AttendanceRecord>,
    /// Accounts in order of their first record.
    order: Vec<String>,
    head: Vec<u8>,
}

impl Ledger {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            entries: Vec::new(),
            records: HashMap::new(),
            order: Vec::new(),
            head: GENESIS_HASH.to_vec(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether `account_id` already has a verified record.
    pub fn is_verified(&self, account_id: &str) -> bool {
        self.records
            .get(account_id)
            .is_some_and(|r| r.status == AttendanceStatus::Verified)
    }

    /// Append the verdict for `packet` and update the account's record.
    ///
    /// Returns the new entry and the account's record after the append. A
    /// rejection for an already verified account is logged but leaves the
    /// record untouched; a second acceptance is refused outright.
    pub fn append(
        &mut self,
        packet: &AttendancePacket,
        verdict: &Result<(), RejectReason>,
        recorded_at_ms: i64,
    ) -> Result<(LedgerEntry, AttendanceRecord), LedgerError> {
        let account_id = packet.account_id.clone();
        if verdict.is_ok() && self.is_verified(&account_id) {
            return Err(LedgerError::AlreadyVerified(account_id));
        }

        let (status, reason) = match verdict {
            Ok(()) => (AttendanceStatus::Verified, None),
            Err(reason) => (AttendanceStatus::Rejected, Some(reason.code().to_string())),
        };
        let mut entry = LedgerEntry {
            sequence: self.entries.len() as u64,
            session_id: self.session_id.clone(),
            account_id: account_id.clone(),
            device_id: packet.device_id.clone(),
            nonce: hex::encode(&packet.nonce),
            liveness_score: packet.liveness_score,
            rssi_at_capture: packet.rssi_at_capture,
            client_timestamp_ms: packet.client_timestamp_ms,
            status,
            reason,
            recorded_at_ms,
            prev_hash: hex::encode(&self.head),
            hash: String::new(),
        };
        entry.hash = entry
            .compute_hash(&self.head)
            .ok_or(LedgerError::ChainBroken {
                sequence: entry.sequence,
            })?;
        self.head = hex::decode(&entry.hash).map_err(|_| LedgerError::ChainBroken {
            sequence: entry.sequence,
        })?;
        self.entries.push(entry.clone());

        let record = match self.records.get_mut(&account_id) {
            Some(existing) if existing.status == AttendanceStatus::Verified => existing.clone(),
            Some(existing) => {
                *existing = entry.record();
                existing.clone()
            }
            None => {
                let record = entry.record();
                self.order.push(account_id.clone());
                self.records.insert(account_id, record.clone());
                record
            }
        };
        Ok((entry, record))
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// One record per account, in order of first appearance.
    pub fn export(&self) -> Vec<AttendanceRecord> {
        self.order
            .iter()
            .filter_map(|account| self.records.get(account).cloned())
            .collect()
    }

    pub fn record(&self, account_id: &str) -> Option<&AttendanceRecord> {
        self.records.get(account_id)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn count(&self, status: AttendanceStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    pub fn verify_chain(&self) -> Result<(), LedgerError> {
        verify_entries(&self.entries)
    }

    /// Rebuild a ledger from stored entries, checking the chain first.
    pub fn from_entries(session_id: &str, entries: Vec<LedgerEntry>) -> Result<Self, LedgerError> {
        verify_entries(&entries)?;
        let mut ledger = Self::new(session_id);
        for entry in &entries {
            if entry.session_id != session_id {
                return Err(LedgerError::ChainBroken {
                    sequence: entry.sequence,
                });
            }
            match ledger.records.get_mut(&entry.account_id) {
                Some(existing) if existing.status == AttendanceStatus::Verified => {}
                Some(existing) => *existing = entry.record(),
                None => {
                    ledger.order.push(entry.account_id.clone());
                    ledger
                        .records
                        .insert(entry.account_id.clone(), entry.record());
                }
            }
        }
        if let Some(last) = entries.last() {
            ledger.head = hex::decode(&last.hash).map_err(|_| LedgerError::ChainBroken {
                sequence: last.sequence,
            })?;
        }
        ledger.entries = entries;
        Ok(ledger)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn packet(account: &str, nonce: u8) -> AttendancePacket {
        AttendancePacket {
            session_id: "s-1".into(),
            account_id: account.into(),
            device_id: "dev".into(),
            nonce: vec![nonce; 16],
            liveness_score: 9300,
            rssi_at_capture: -45,
            client_timestamp_ms: 1,
            signature: vec![0; 64],
        }
    }

    #[test]
    fn verified_record_is_immutable() {
        let mut ledger = Ledger::new("s-1");
        ledger.append(&packet("alice", 1), &Ok(()), 10).unwrap();
        let (entry, record) = ledger
            .append(&packet("alice", 2), &Err(RejectReason::Duplicate), 20)
            .unwrap();

        assert_eq!(entry.status, AttendanceStatus::Rejected);
        assert_eq!(entry.reason.as_deref(), Some("duplicate"));
        assert_eq!(record.status, AttendanceStatus::Verified);
        assert_eq!(record.recorded_at_ms, 10);
        assert_eq!(ledger.entries().len(), 2);
        assert_eq!(ledger.record_count(), 1);
    }

    #[test]
    fn second_acceptance_is_refused() {
        let mut ledger = Ledger::new("s-1");
        ledger.append(&packet("alice", 1), &Ok(()), 10).unwrap();
        assert_eq!(
            ledger.append(&packet("alice", 2), &Ok(()), 20).unwrap_err(),
            LedgerError::AlreadyVerified("alice".into())
        );
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn rejected_record_can_be_upgraded() {
        let mut ledger = Ledger::new("s-1");
        ledger
            .append(&packet("bob", 1), &Err(RejectReason::NonceExpired), 10)
            .unwrap();
        let (_, record) = ledger.append(&packet("bob", 2), &Ok(()), 20).unwrap();
        assert_eq!(record.status, AttendanceStatus::Verified);
        assert_eq!(record.reason, None);
        assert_eq!(ledger.count(AttendanceStatus::Verified), 1);
        assert_eq!(ledger.count(AttendanceStatus::Rejected), 0);
    }

    #[test]
    fn export_keeps_first_seen_order() {
        let mut ledger = Ledger::new("s-1");
        for (i, account) in ["carol", "alice", "bob"].into_iter().enumerate() {
            ledger.append(&packet(account, i as u8), &Ok(()), 0).unwrap();
        }
        let accounts: Vec<_> = ledger.export().into_iter().map(|r| r.account_id).collect();
        assert_eq!(accounts, ["carol", "alice", "bob"]);
    }

    #[test]
    fn chain_detects_tampering() {
        let mut ledger = Ledger::new("s-1");
        ledger.append(&packet("alice", 1), &Ok(()), 10).unwrap();
        ledger
            .append(&packet("bob", 2), &Err(RejectReason::BadSignature), 11)
            .unwrap();
        ledger.append(&packet("carol", 3), &Ok(()), 12).unwrap();
        assert_eq!(ledger.verify_chain(), Ok(()));

        let mut forged = ledger.entries().to_vec();
        forged[1].status = AttendanceStatus::Verified;
        forged[1].reason = None;
        assert_eq!(
            verify_entries(&forged),
            Err(LedgerError::ChainBroken { sequence: 1 })
        );

        let mut dropped = ledger.entries().to_vec();
        dropped.remove(1);
        assert!(verify_entries(&dropped).is_err());
    }

    #[test]
    fn rebuilt_ledger_matches_and_keeps_chaining() {
        let mut ledger = Ledger::new("s-1");
        ledger
            .append(&packet("bob", 1), &Err(RejectReason::NonceExpired), 10)
            .unwrap();
        ledger.append(&packet("alice", 2), &Ok(()), 11).unwrap();
        ledger.append(&packet("bob", 3), &Ok(()), 12).unwrap();

        let mut rebuilt = Ledger::from_entries("s-1", ledger.entries().to_vec()).unwrap();
        assert_eq!(rebuilt.export(), ledger.export());
        assert!(rebuilt.is_verified("bob"));

        rebuilt
            .append(&packet("carol", 4), &Ok(()), 13)
            .unwrap();
        assert_eq!(rebuilt.verify_chain(), Ok(()));
    }

    #[test]
    fn rebuild_rejects_foreign_entries() {
        let mut ledger = Ledger::new("s-1");
        ledger.append(&packet("alice", 1), &Ok(()), 10).unwrap();
        assert!(Ledger::from_entries("s-2", ledger.entries().to_vec()).is_err());
    }
}
